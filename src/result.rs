use super::errors::{SpawnError, UnitError};

pub type SpawnResult<T> = Result<T, SpawnError>;

pub type UnitResult<T> = Result<T, UnitError>;
