//! Firmware line protocol: commands sent to the motion controller and the
//! telemetry lines it answers with.

mod command;
mod lexer;
mod reply;

pub use command::{DEFAULT_FEED_RATE, MachineCommand};
pub use lexer::{LexError, Lexer, Token, TokenKind, lex};
pub use reply::{Position, Reply, ReplyError, StepsPerUnit, fields};
