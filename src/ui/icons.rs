//! Shared status icons for the terminal summary.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static REUSED: Emoji<'_, '_> = Emoji("♻️  ", "[=]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[-]");
pub static OFFLINE: Emoji<'_, '_> = Emoji("📴 ", "[OFF]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
