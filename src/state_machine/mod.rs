// Run statuses for the job/partition/step audit records, and the chunk loop state machine.

pub mod chunk_state_machine;
pub mod events;
pub mod states;

pub use chunk_state_machine::ChunkStateMachine;
pub use events::ChunkEvent;
pub use states::{ChunkState, RunStatus};
