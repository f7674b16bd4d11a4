/*!
 # Device state snapshot

 The last known state of a strip. Snapshots are values: every change builds a
 new snapshot from the previous one and replaces it wholesale, so readers
 never see a half-applied update.
*/

use std::fmt;

use crate::codec::PowerStatus;

/// Qualitative assessment of a received signal strength
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalQuality {
    Unknown,
    Excellent,
    Good,
    Bad,
    Terrible,
}

impl SignalQuality {
    /// Classifies an RSSI reading in dBm
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            0.. => SignalQuality::Unknown,
            -55..=-1 => SignalQuality::Excellent,
            -75..=-56 => SignalQuality::Good,
            -85..=-76 => SignalQuality::Bad,
            _ => SignalQuality::Terrible,
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalQuality::Unknown => "Unknown",
            SignalQuality::Excellent => "Excellent",
            SignalQuality::Good => "Good",
            SignalQuality::Bad => "Bad",
            SignalQuality::Terrible => "Terrible",
        };
        f.write_str(name)
    }
}

/// Last known state of a strip
///
/// `color` and `effect` are never both set. `effect_speed` uses the public
/// scale (0 is fastest) and is only kept while an effect is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Current power state
    pub on: Option<bool>,
    /// Current brightness (0-255)
    pub brightness: Option<u8>,
    /// Current RGB color (red, green, blue)
    pub color: Option<(u8, u8, u8)>,
    /// Current effect name if active
    pub effect: Option<&'static str>,
    /// Current effect speed if an effect is active
    pub effect_speed: Option<u8>,
    /// Derived from the RSSI seen at discovery; not reported by the device
    pub signal_quality: Option<SignalQuality>,
}

impl DeviceState {
    /// Static color; drops any effect.
    pub fn with_color(&self, red: u8, green: u8, blue: u8) -> Self {
        Self {
            color: Some((red, green, blue)),
            effect: None,
            effect_speed: None,
            ..self.clone()
        }
    }

    /// Effect (or no effect); drops any static color.
    ///
    /// Clearing the effect also clears its speed.
    pub fn with_effect(&self, effect: Option<&'static str>, speed: Option<u8>) -> Self {
        Self {
            color: None,
            effect,
            effect_speed: effect.and(speed),
            ..self.clone()
        }
    }

    /// New effect speed; ignored while no effect is set.
    pub fn with_effect_speed(&self, speed: u8) -> Self {
        Self {
            effect_speed: self.effect.map(|_| speed),
            ..self.clone()
        }
    }

    pub fn with_brightness(&self, brightness: u8) -> Self {
        Self {
            brightness: Some(brightness),
            ..self.clone()
        }
    }

    /// Flips the power state, if it is known.
    pub fn with_power_toggled(&self) -> Self {
        Self {
            on: self.on.map(|on| !on),
            ..self.clone()
        }
    }

    /// Applies a status frame reported by the device
    pub fn with_power_status(&self, status: PowerStatus) -> Self {
        Self {
            on: Some(status.on),
            brightness: Some(status.brightness),
            ..self.clone()
        }
    }

    pub fn with_signal_quality(&self, quality: Option<SignalQuality>) -> Self {
        Self {
            signal_quality: quality,
            ..self.clone()
        }
    }
}

fn or_unknown<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "?".to_string(), |value| value.to_string())
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "on={} brightness={}",
            or_unknown(self.on),
            or_unknown(self.brightness)
        )?;
        if let Some((red, green, blue)) = self.color {
            write!(f, " color={red},{green},{blue}")?;
        }
        if let Some(effect) = self.effect {
            write!(f, " effect=\"{effect}\" speed={}", or_unknown(self.effect_speed))?;
        }
        write!(f, " signal={}", or_unknown(self.signal_quality))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, SignalQuality::Unknown)]
    #[case(12, SignalQuality::Unknown)]
    #[case(-1, SignalQuality::Excellent)]
    #[case(-55, SignalQuality::Excellent)]
    #[case(-56, SignalQuality::Good)]
    #[case(-75, SignalQuality::Good)]
    #[case(-76, SignalQuality::Bad)]
    #[case(-85, SignalQuality::Bad)]
    #[case(-86, SignalQuality::Terrible)]
    fn classifies_rssi(#[case] rssi: i16, #[case] expected: SignalQuality) {
        assert_eq!(expected, SignalQuality::from_rssi(rssi));
    }

    #[test]
    fn color_and_effect_exclude_each_other() {
        let state = DeviceState::default()
            .with_effect(Some("Colorful"), Some(10))
            .with_color(1, 2, 3);
        assert_eq!(Some((1, 2, 3)), state.color);
        assert_eq!(None, state.effect);
        assert_eq!(None, state.effect_speed);

        let state = state.with_effect(Some("Colorful"), Some(10));
        assert_eq!(None, state.color);
        assert_eq!(Some("Colorful"), state.effect);
        assert_eq!(Some(10), state.effect_speed);
    }

    #[test]
    fn speed_needs_an_effect() {
        let state = DeviceState::default().with_effect_speed(20);
        assert_eq!(None, state.effect_speed);
        assert_eq!(None, state.with_effect(None, Some(3)).effect_speed);
    }

    #[test]
    fn power_status_carries_everything_else_over() {
        let before = DeviceState::default()
            .with_color(9, 9, 9)
            .with_signal_quality(Some(SignalQuality::Good));
        let after = before.with_power_status(PowerStatus {
            on: true,
            brightness: 127,
        });
        assert_eq!(
            DeviceState {
                on: Some(true),
                brightness: Some(127),
                ..before
            },
            after
        );
    }

    #[test]
    fn toggle_keeps_unknown_power_unknown() {
        assert_eq!(None, DeviceState::default().with_power_toggled().on);
        let on = DeviceState {
            on: Some(true),
            ..DeviceState::default()
        };
        assert_eq!(Some(false), on.with_power_toggled().on);
    }

    #[test]
    fn displays_known_fields() {
        let state = DeviceState::default()
            .with_brightness(40)
            .with_effect(Some("Colorful"), Some(0));
        assert_eq!(
            "on=? brightness=40 effect=\"Colorful\" speed=0 signal=?",
            state.to_string()
        );
    }
}
