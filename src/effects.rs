/*!
 # Built-in effects for MagicStrip strips

 The strip ships with a fixed set of animations. Each one is selected with a
 `07 XX` command, where `XX` is the effect id below.
*/

use crate::codec::Command;

/// A named built-in animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    /// Display name, used as the lookup key
    pub name: &'static str,
    /// Second byte of the `07 XX` select command
    pub id: u8,
}

impl Effect {
    const fn new(name: &'static str, id: u8) -> Self {
        Self { name, id }
    }

    /// The command that selects this effect
    pub fn command(&self) -> Command {
        Command::effect(self.id)
    }
}

/// Predefined effects with their command values, in wire order
pub const EFFECTS: [Effect; 41] = [
    Effect::new("Flashing Blue", 0x01),
    Effect::new("Flashing Green", 0x02),
    Effect::new("Flashing Red", 0x03),
    Effect::new("Flashing Cyan", 0x04),
    Effect::new("Flashing Purple", 0x05),
    Effect::new("Flashing Yellow", 0x06),
    Effect::new("Flashing White", 0x07),
    Effect::new("Breathing Blue", 0x08),
    Effect::new("Breathing Green", 0x09),
    Effect::new("Breathing Red", 0x0a),
    Effect::new("Breathing Cyan", 0x0b),
    Effect::new("Breathing Purple", 0x0c),
    Effect::new("Breathing Yellow", 0x0d),
    Effect::new("Breathing White", 0x0e),
    Effect::new("Strobe Blue", 0x0f),
    Effect::new("Strobe Green", 0x10),
    Effect::new("Strobe Red", 0x11),
    Effect::new("Strobe Cyan", 0x12),
    Effect::new("Strobe Purple", 0x13),
    Effect::new("Strobe Yellow", 0x14),
    Effect::new("Strobe White", 0x15),
    Effect::new("Gradient RBR", 0x16),
    Effect::new("Gradient WVW", 0x17),
    Effect::new("Gradient GVG", 0x18),
    Effect::new("Gradient BYB", 0x19),
    Effect::new("Gradient RCR", 0x1a),
    Effect::new("Gradient YCY", 0x1b),
    Effect::new("Gradient VCV", 0x1c),
    Effect::new("Gradient VYV", 0x1d),
    Effect::new("Three-Color Transitions", 0x1e),
    Effect::new("Colorful Jump", 0x1f),
    Effect::new("Three-Color Alternating Breathing", 0x20),
    Effect::new("Colorful Alternate Breathing", 0x21),
    Effect::new("Colorful", 0x22),
    Effect::new("Six Color Gradient", 0x23),
    Effect::new("RGB Gradient", 0x24),
    Effect::new("Three-Color Flashing", 0x25),
    Effect::new("Colorful Flashing", 0x26),
    Effect::new("Three-Color Strobe", 0x27),
    Effect::new("Colorful Strobe", 0x28),
    Effect::new("Automatic", 0xf0),
];

/// Looks up an effect by its exact name
pub fn find(name: &str) -> Option<&'static Effect> {
    EFFECTS.iter().find(|effect| effect.name == name)
}

/// Names of all effects, in wire order
pub fn names() -> impl Iterator<Item = &'static str> {
    EFFECTS.iter().map(|effect| effect.name)
}
