//! Inbound compliance commands (`block.agent`, `unblock.agent`).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::AgentService;
use crate::bus::{EntityRef, HandlerError, InboundEvent, MessageHandler};
use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceCommand {
    Block,
    Unblock,
}

impl ComplianceCommand {
    pub const ALL: [ComplianceCommand; 2] = [ComplianceCommand::Block, ComplianceCommand::Unblock];

    /// Binding key on the compliance exchange.
    pub fn binding_key(&self) -> &'static str {
        match self {
            ComplianceCommand::Block => "block.agent",
            ComplianceCommand::Unblock => "unblock.agent",
        }
    }
}

/// Applies a compliance command to the agent named in the payload.
///
/// Redelivery is harmless: blocking a blocked agent just blocks it again, and
/// an unknown agent is acknowledged without effect.
pub struct ComplianceHandler {
    command: ComplianceCommand,
    agents: Arc<AgentService>,
}

impl ComplianceHandler {
    pub fn new(command: ComplianceCommand, agents: Arc<AgentService>) -> Self {
        Self { command, agents }
    }
}

fn classify(err: ServiceError) -> HandlerError {
    if err.is_retryable() {
        HandlerError::Transient(err.to_string())
    } else {
        HandlerError::Rejected(err.to_string())
    }
}

#[async_trait]
impl MessageHandler for ComplianceHandler {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        let EntityRef::Id(agent_id) = event.entity else {
            return Err(HandlerError::Rejected(format!(
                "{} needs a single agent id",
                self.command.binding_key()
            )));
        };

        let applied = match self.command {
            ComplianceCommand::Block => self.agents.block(agent_id).await,
            ComplianceCommand::Unblock => self.agents.unblock(agent_id).await,
        }
        .map_err(classify)?;

        if !applied {
            info!(
                %agent_id,
                command = self.command.binding_key(),
                "agent not found, nothing to do"
            );
        }
        Ok(())
    }
}
