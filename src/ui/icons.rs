//! Shared terminal icons, with plain-text fallbacks for terminals without emoji.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN] ");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "* ");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "> ");
pub static THINKING: Emoji<'_, '_> = Emoji("💭 ", "... ");
pub static TICKET: Emoji<'_, '_> = Emoji("🎫 ", "# ");
