//! Text helpers shared by the agent, the response synthesizer and the audit trail

pub mod text_mining;
pub mod text_utils;

pub use text_mining::{KeywordScore, TextMiner};
pub use text_utils::TextUtils;
