//! Transaction access modes.

use serde::{Deserialize, Serialize};

/// Access mode a statement runs under.
///
/// The pipeline only ever issues `ReadOnly`; drivers that talk to a real
/// database translate it into a read session (or `access-mode: READ`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    pub fn is_read_only(self) -> bool {
        self == TxMode::ReadOnly
    }
}
