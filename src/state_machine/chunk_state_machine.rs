use super::{events::ChunkEvent, states::ChunkState};
use crate::error::BatchError;

/// Transition table for one step's chunk loop.
///
/// ```text
/// Reading --ItemBuffered--> Reading
/// Reading --BufferFull | SourceExhausted{buffered > 0}--> Writing
/// Reading --SourceExhausted{buffered == 0}--> Done
/// Writing --WriteSucceeded--> Committed --NextChunk--> Reading
/// Reading | Writing --Fault--> Failed
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChunkStateMachine {
    state: ChunkState,
    transitions: usize,
}

impl ChunkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> ChunkState {
        self.state
    }

    pub fn transition_count(&self) -> usize {
        self.transitions
    }

    /// Apply an event, returning the new state
    pub fn transition(&mut self, event: &ChunkEvent) -> Result<ChunkState, BatchError> {
        let target = Self::determine_target_state(self.state, event)?;
        self.state = target;
        self.transitions += 1;
        Ok(target)
    }

    pub fn determine_target_state(
        current_state: ChunkState,
        event: &ChunkEvent,
    ) -> Result<ChunkState, BatchError> {
        let target = match (current_state, event) {
            (ChunkState::Reading, ChunkEvent::ItemBuffered) => ChunkState::Reading,
            (ChunkState::Reading, ChunkEvent::BufferFull) => ChunkState::Writing,
            (ChunkState::Reading, ChunkEvent::SourceExhausted { buffered }) if *buffered > 0 => {
                ChunkState::Writing
            }
            (ChunkState::Reading, ChunkEvent::SourceExhausted { .. }) => ChunkState::Done,

            (ChunkState::Writing, ChunkEvent::WriteSucceeded) => ChunkState::Committed,
            (ChunkState::Committed, ChunkEvent::NextChunk) => ChunkState::Reading,

            (ChunkState::Reading | ChunkState::Writing, ChunkEvent::Fault(_)) => {
                ChunkState::Failed
            }

            (from_state, _) => {
                return Err(BatchError::StateTransition(format!(
                    "invalid chunk transition from {from_state} on {}",
                    event.event_type()
                )))
            }
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_chunk_cycle() {
        let mut machine = ChunkStateMachine::new();
        assert_eq!(
            machine.transition(&ChunkEvent::ItemBuffered).unwrap(),
            ChunkState::Reading
        );
        assert_eq!(
            machine.transition(&ChunkEvent::BufferFull).unwrap(),
            ChunkState::Writing
        );
        assert_eq!(
            machine.transition(&ChunkEvent::WriteSucceeded).unwrap(),
            ChunkState::Committed
        );
        assert_eq!(
            machine.transition(&ChunkEvent::NextChunk).unwrap(),
            ChunkState::Reading
        );
        assert_eq!(
            machine
                .transition(&ChunkEvent::SourceExhausted { buffered: 0 })
                .unwrap(),
            ChunkState::Done
        );
        assert_eq!(machine.transition_count(), 5);
    }

    #[test]
    fn test_partial_final_chunk_is_written() {
        let target = ChunkStateMachine::determine_target_state(
            ChunkState::Reading,
            &ChunkEvent::SourceExhausted { buffered: 3 },
        )
        .unwrap();
        assert_eq!(target, ChunkState::Writing);
    }

    #[test]
    fn test_fault_from_writing_is_terminal() {
        let mut machine = ChunkStateMachine::new();
        machine.transition(&ChunkEvent::BufferFull).unwrap();
        assert_eq!(
            machine.transition(&ChunkEvent::fault("constraint")).unwrap(),
            ChunkState::Failed
        );
        assert!(machine.current_state().is_terminal());
        assert!(machine.transition(&ChunkEvent::NextChunk).is_err());
    }

    #[test]
    fn test_cannot_write_while_reading() {
        let result =
            ChunkStateMachine::determine_target_state(ChunkState::Reading, &ChunkEvent::WriteSucceeded);
        assert!(matches!(result, Err(BatchError::StateTransition(_))));
    }
}
