//! Network Router - decides, before every turn, whether the agent runs again

use crate::agent::Agent;
use tracing::{info, warn};
use vibecraft_runtime::{Result, RunState, ToolContext, UsageTracker};

/// Upper bound on agent turns in one run
pub const DEFAULT_MAX_ITER: usize = 15;

/// Why the router stopped the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The agent recorded a summary
    Concluded,
    /// The turn budget ran out first
    IterationCap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Running,
    Halted(HaltReason),
}

/// Two-state machine: keep running until a summary exists or the cap is hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Router {
    max_iter: usize,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITER)
    }
}

impl Router {
    pub fn new(max_iter: usize) -> Self {
        Self { max_iter }
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    /// Decide the next state given how many turns already ran
    pub fn next(&self, turns_taken: usize, state: &RunState) -> RouterState {
        if state.is_concluded() {
            RouterState::Halted(HaltReason::Concluded)
        } else if turns_taken >= self.max_iter {
            RouterState::Halted(HaltReason::IterationCap)
        } else {
            RouterState::Running
        }
    }
}

/// Summary of a finished network run
#[derive(Debug, Clone)]
pub struct NetworkRun {
    pub turns: usize,
    pub halt: HaltReason,
    pub usage: UsageTracker,
}

/// The agent loop driven by the router
pub struct Network {
    name: String,
    agent: Agent,
    router: Router,
}

impl Network {
    pub fn new(name: impl Into<String>, agent: Agent, router: Router) -> Self {
        Self {
            name: name.into(),
            agent,
            router,
        }
    }

    /// Run agent turns on `input` until the router halts
    pub async fn run(&self, input: &str, ctx: &mut ToolContext<'_>) -> Result<NetworkRun> {
        let mut messages = self.agent.seed_messages(ctx.state.history(), input);
        let mut usage = UsageTracker::new();
        let mut turns = 0;

        let halt = loop {
            if let RouterState::Halted(reason) = self.router.next(turns, &*ctx.state) {
                break reason;
            }
            turns += 1;

            let turn = self.agent.run_turn(&mut messages, ctx).await?;
            usage.track(&turn.response.model, &turn.response.usage);
            info!(
                network = %self.name,
                agent = self.agent.name(),
                turn = turns,
                tool_calls = turn.tool_calls.len(),
                "turn complete"
            );
        };

        match halt {
            HaltReason::Concluded => info!(network = %self.name, turns, "network concluded"),
            HaltReason::IterationCap => {
                warn!(network = %self.name, turns, "network hit the iteration cap without a summary")
            }
        }

        Ok(NetworkRun { turns, halt, usage })
    }
}
