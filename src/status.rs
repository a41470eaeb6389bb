use std::fmt;

// NUT status flags we act on.
const ONLINE_FLAG: &str = "OL";
const ON_BATTERY_FLAG: &str = "OB";

/// A variable as read from the NUT server.
///
/// Reads never fail from the caller's point of view: anything that could not
/// be read or parsed becomes `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Known(String),
    Unknown,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Known(value) => write!(f, "{}", value),
            Value::Unknown => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Connecting,
    Online,
    OnBattery,
    Degraded,
}

impl PowerState {
    /// Maps a raw `ups.status` value onto a power state.
    ///
    /// `OL` wins over `OB` when a (misbehaving) server reports both.
    pub fn from_status(status: &Value) -> PowerState {
        match status {
            Value::Known(s) if s.contains(ONLINE_FLAG) => PowerState::Online,
            Value::Known(s) if s.contains(ON_BATTERY_FLAG) => PowerState::OnBattery,
            _ => PowerState::Degraded,
        }
    }

    /// Human readable mode for the tooltip.
    pub fn label(&self) -> &'static str {
        match self {
            PowerState::Connecting => "Connecting",
            PowerState::Online => "Online",
            PowerState::OnBattery => "Battery",
            PowerState::Degraded => "Unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One tick's worth of readings.
#[derive(Debug, Clone)]
pub struct UpsStatus {
    pub ups_name: String,
    pub status: Value,
    pub charge: Value,
    pub state: PowerState,
}

impl UpsStatus {
    pub fn new(ups_name: &str, status: Value, charge: Value) -> UpsStatus {
        let state = PowerState::from_status(&status);
        UpsStatus {
            ups_name: ups_name.to_string(),
            status,
            charge,
            state,
        }
    }

    pub fn tooltip(&self) -> String {
        if self.state == PowerState::Degraded {
            return "Connection failed!\nCheck the connection or the credentials".to_string();
        }
        format!(
            "UPS: {}\nStatus: {}\nCharge: {}%",
            self.ups_name, self.state, self.charge
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(s: &str) -> Value {
        Value::Known(s.to_string())
    }

    #[test]
    fn classifies_status_flags() {
        assert_eq!(PowerState::from_status(&known("OL")), PowerState::Online);
        assert_eq!(
            PowerState::from_status(&known("OL CHRG")),
            PowerState::Online
        );
        assert_eq!(
            PowerState::from_status(&known("OB DISCHRG")),
            PowerState::OnBattery
        );
        assert_eq!(
            PowerState::from_status(&known("OB LB")),
            PowerState::OnBattery
        );
    }

    #[test]
    fn unknown_or_unrecognised_status_is_degraded() {
        assert_eq!(PowerState::from_status(&Value::Unknown), PowerState::Degraded);
        assert_eq!(PowerState::from_status(&known("BYPASS")), PowerState::Degraded);
        // Matching is case sensitive.
        assert_eq!(PowerState::from_status(&known("ol")), PowerState::Degraded);
    }

    #[test]
    fn tooltip_lists_name_mode_and_charge() {
        let status = UpsStatus::new("rack", known("OB DISCHRG"), known("55"));
        assert_eq!(status.tooltip(), "UPS: rack\nStatus: Battery\nCharge: 55%");

        let status = UpsStatus::new("rack", known("OL"), Value::Unknown);
        assert_eq!(status.tooltip(), "UPS: rack\nStatus: Online\nCharge: ?%");
    }

    #[test]
    fn degraded_tooltip_reports_connection_failure() {
        let status = UpsStatus::new("rack", Value::Unknown, known("90"));
        assert!(status.tooltip().starts_with("Connection failed!"));
    }
}
