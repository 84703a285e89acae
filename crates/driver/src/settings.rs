use apc_library::codec::ColorEncoding;
use apc_library::runtime::{MAX_TICK_HZ, MIN_TICK_HZ, RuntimeOptions};
use apc_library::transport::PortSelection;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(default)]
pub(crate) struct Settings {
    pub client_name: String,
    /// Substring of the device's input port name, matched case-insensitively.
    pub input_port: String,
    pub output_port: String,
    /// If true, every message the device sends is also forwarded to a
    /// virtual output port so a DAW can listen to the raw pads.
    pub loopback: bool,
    pub loopback_port_name: String,
    pub tick_hz: u32,
    pub max_messages_per_tick: usize,
    /// Ticks worth of output that may wait for the device before frames
    /// start being dropped.
    pub queue_depth: usize,
    /// Valid values: "palette", "sysex".
    pub color_encoding: String,
    /// Take the tempo from incoming MIDI clock.
    pub follow_clock: bool,
    pub self_test: bool,
    pub blackout_on_exit: bool,
    /// Profile loaded at startup. Empty for none.
    pub profile: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_name: "APC mini mk2 driver".to_string(),
            input_port: "APC mini mk2".to_string(),
            output_port: "APC mini mk2".to_string(),
            loopback: false,
            loopback_port_name: "APC mini mk2 Loopback".to_string(),
            tick_hz: 30,
            max_messages_per_tick: 64,
            queue_depth: 4,
            color_encoding: "palette".to_string(),
            follow_clock: false,
            self_test: true,
            blackout_on_exit: true,
            profile: "".to_string(),
        }
    }
}

impl Settings {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.client_name.is_empty() {
            return Err("Client name must not be empty".to_string());
        }

        if self.input_port.is_empty() || self.output_port.is_empty() {
            return Err("Input and output port names must not be empty".to_string());
        }

        if self.loopback && self.loopback_port_name.is_empty() {
            return Err("Loopback port name must not be empty when loopback is on".to_string());
        }

        if !(MIN_TICK_HZ..=MAX_TICK_HZ).contains(&self.tick_hz) {
            return Err(format!(
                "tick_hz must be {MIN_TICK_HZ} to {MAX_TICK_HZ} (found {})",
                self.tick_hz
            ));
        }

        if !(1..=256).contains(&self.max_messages_per_tick) {
            return Err(format!(
                "max_messages_per_tick must be 1 to 256 (found {})",
                self.max_messages_per_tick
            ));
        }

        if self.queue_depth == 0 {
            return Err("queue_depth must be at least 1".to_string());
        }

        self.color_encoding()?;
        Ok(())
    }

    pub(crate) fn color_encoding(&self) -> Result<ColorEncoding, String> {
        self.color_encoding.parse()
    }

    pub(crate) fn port_selection(&self) -> PortSelection {
        PortSelection {
            client_name: self.client_name.clone(),
            input_port: self.input_port.clone(),
            output_port: self.output_port.clone(),
            loopback: self.loopback.then(|| self.loopback_port_name.clone()),
        }
    }

    pub(crate) fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            tick_hz: self.tick_hz,
            blackout_on_exit: self.blackout_on_exit,
        }
    }

    pub(crate) fn profile(&self) -> Option<&str> {
        Some(self.profile.as_str()).filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn load(toml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.color_encoding(), Ok(ColorEncoding::Palette));
        assert_eq!(settings.port_selection().loopback, None);
        assert_eq!(settings.profile(), None);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let settings = load(
            r#"
            tick_hz = 60
            color_encoding = "sysex"
            loopback = true
            profile = "stage.json"
            "#,
        );
        settings.validate().unwrap();
        assert_eq!(settings.tick_hz, 60);
        assert_eq!(settings.color_encoding(), Ok(ColorEncoding::Sysex));
        assert_eq!(
            settings.port_selection().loopback.as_deref(),
            Some("APC mini mk2 Loopback")
        );
        assert_eq!(settings.profile(), Some("stage.json"));
        assert_eq!(settings.max_messages_per_tick, 64);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load("tick_hz = 500").validate().is_err());
        assert!(load("max_messages_per_tick = 0").validate().is_err());
        assert!(load("queue_depth = 0").validate().is_err());
        assert!(load(r#"color_encoding = "cmyk""#).validate().is_err());
        assert!(load(r#"client_name = """#).validate().is_err());
    }
}
