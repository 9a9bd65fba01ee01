//! Terminal bridge over a native pseudo-terminal

mod bridge;
mod terminal;

pub use bridge::{
    Bridge, BridgeOptions, CloseOutcome, ResetOutcome, RECOVERY_RESET, RECOVERY_RESET_FAILED,
};
pub use terminal::{PtySpawner, PtyTerminal, ShellCommand, Terminal, TerminalSpawner};
