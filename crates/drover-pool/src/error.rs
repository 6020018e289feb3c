use thiserror::Error;

/// Errors surfaced by pool operations.
///
/// Termination problems are not errors: popping a worker that already
/// exited still removes its record.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawned worker {program:?} exited before its pid could be read")]
    NoPid { program: String },
}
