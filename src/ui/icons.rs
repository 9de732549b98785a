//! Shared UI icons and emojis.
//!
//! This module provides common emoji constants used across the UI components
//! for consistent visual styling.

use console::Emoji;

// Status indicators used by the orchestrator progress UI.
pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274c} ", "[ERR] ");
pub static SPARKLE: Emoji<'_, '_> = Emoji("\u{2728} ", "* ");
pub static BLOCKER: Emoji<'_, '_> = Emoji("\u{1f6a7} ", "[BLOCK] ");
pub static PIVOT: Emoji<'_, '_> = Emoji("\u{1f504} ", "[PIVOT] ");
