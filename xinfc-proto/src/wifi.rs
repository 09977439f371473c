//! Wi-Fi encryption and authentication types
//!
//! The numeric values are the WSC attribute values written on the tag. Combined
//! modes (TKIP+AES, WPA/WPA2) are named variants with the bitwise union as their
//! wire value.

/// SSID length bounds in bytes
pub const SSID_MIN: usize = 2;
pub const SSID_MAX: usize = 28;

/// Passphrase length bounds in bytes
pub const PASS_MIN: usize = 8;
pub const PASS_MAX: usize = 63;

/// WSC encryption type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Crypt {
    None = 0x01,
    Wep = 0x02,
    Tkip = 0x04,
    Aes = 0x08,
    TkipAes = 0x0C,
}

impl Crypt {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Crypt::None),
            0x02 => Some(Crypt::Wep),
            0x04 => Some(Crypt::Tkip),
            0x08 => Some(Crypt::Aes),
            0x0C => Some(Crypt::TkipAes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Crypt::None => "none",
            Crypt::Wep => "wep",
            Crypt::Tkip => "tkip",
            Crypt::Aes => "aes",
            Crypt::TkipAes => "tkip+aes",
        }
    }
}

/// WSC authentication type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Auth {
    Open = 0x01,
    WpaPersonal = 0x02,
    Shared = 0x04,
    WpaEnterprise = 0x08,
    Wpa2Enterprise = 0x10,
    Wpa2Personal = 0x20,
    WpaWpa2Personal = 0x22,
}

impl Auth {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Auth::Open),
            0x02 => Some(Auth::WpaPersonal),
            0x04 => Some(Auth::Shared),
            0x08 => Some(Auth::WpaEnterprise),
            0x10 => Some(Auth::Wpa2Enterprise),
            0x20 => Some(Auth::Wpa2Personal),
            0x22 => Some(Auth::WpaWpa2Personal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Auth::Open => "open",
            Auth::WpaPersonal => "wpa-personal",
            Auth::Shared => "shared",
            Auth::WpaEnterprise => "wpa-enterprise",
            Auth::Wpa2Enterprise => "wpa2-enterprise",
            Auth::Wpa2Personal => "wpa2-personal",
            Auth::WpaWpa2Personal => "wpa/wpa2-personal",
        }
    }
}

/// Whether a mode can be expressed in the tag record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSupport {
    Supported,
    /// Accepted, but announced as a weaker mode
    Downgraded(&'static str),
    /// Cannot be expressed in a WSC record
    Rejected(&'static str),
}

/// An entry of the encryption mode table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiMode {
    pub name: &'static str,
    pub support: ModeSupport,
    pub crypt: Crypt,
    pub auth: Auth,
}

impl WifiMode {
    const fn new(name: &'static str, crypt: Crypt, auth: Auth) -> Self {
        Self { name, support: ModeSupport::Supported, crypt, auth }
    }

    const fn downgraded(name: &'static str, crypt: Crypt, auth: Auth, msg: &'static str) -> Self {
        Self { name, support: ModeSupport::Downgraded(msg), crypt, auth }
    }

    const fn rejected(name: &'static str, msg: &'static str) -> Self {
        Self { name, support: ModeSupport::Rejected(msg), crypt: Crypt::None, auth: Auth::Open }
    }

    /// Advisory or rejection message, if any
    pub fn message(&self) -> Option<&'static str> {
        match self.support {
            ModeSupport::Supported => None,
            ModeSupport::Downgraded(msg) | ModeSupport::Rejected(msg) => Some(msg),
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self.support, ModeSupport::Rejected(_))
    }
}

const NO_WPA3: &str = "WPA3 encryption modes not supported";
const NO_OWE: &str = "OWE mode not supported";
const MIXED_WPA3: &str = "Mixed WPA2/WPA3 will be announced as WPA2";
const MIXED_WPA2: &str = "Mixed WPA/WPA2 will be announced as WPA2";

/// OpenWrt encryption mode names
/// (https://openwrt.org/docs/guide-user/network/wifi/basic#encryption_modes)
pub static MODES: &[WifiMode] = &[
    WifiMode::new("none", Crypt::None, Auth::Open),
    WifiMode::rejected("sae", NO_WPA3),
    WifiMode::downgraded("sae-mixed", Crypt::Aes, Auth::Wpa2Personal, MIXED_WPA3),
    WifiMode::new("psk2+tkip+ccmp", Crypt::TkipAes, Auth::Wpa2Personal),
    WifiMode::new("psk2+tkip+aes", Crypt::TkipAes, Auth::Wpa2Personal),
    WifiMode::new("psk2+tkip", Crypt::Tkip, Auth::Wpa2Personal),
    WifiMode::new("psk2+ccmp", Crypt::Aes, Auth::Wpa2Personal),
    WifiMode::new("psk2+aes", Crypt::Aes, Auth::Wpa2Personal),
    WifiMode::new("psk2", Crypt::Aes, Auth::Wpa2Personal),
    WifiMode::new("psk+tkip+ccmp", Crypt::TkipAes, Auth::WpaPersonal),
    WifiMode::new("psk+tkip+aes", Crypt::TkipAes, Auth::WpaPersonal),
    WifiMode::new("psk+tkip", Crypt::Tkip, Auth::WpaPersonal),
    WifiMode::new("psk+ccmp", Crypt::Aes, Auth::WpaPersonal),
    WifiMode::new("psk+aes", Crypt::Aes, Auth::WpaPersonal),
    WifiMode::new("psk", Crypt::Aes, Auth::WpaPersonal),
    WifiMode::new("psk-mixed+tkip+ccmp", Crypt::TkipAes, Auth::WpaWpa2Personal),
    WifiMode::new("psk-mixed+tkip+aes", Crypt::TkipAes, Auth::WpaWpa2Personal),
    WifiMode::new("psk-mixed+tkip", Crypt::Tkip, Auth::WpaWpa2Personal),
    WifiMode::new("psk-mixed+ccmp", Crypt::Aes, Auth::WpaWpa2Personal),
    WifiMode::new("psk-mixed+aes", Crypt::Aes, Auth::WpaWpa2Personal),
    WifiMode::new("psk-mixed", Crypt::Aes, Auth::WpaWpa2Personal),
    WifiMode::new("wep", Crypt::Wep, Auth::Open),
    WifiMode::new("wep+open", Crypt::Wep, Auth::Open),
    WifiMode::new("wep+shared", Crypt::Wep, Auth::Shared),
    WifiMode::rejected("wpa3", NO_WPA3),
    WifiMode::downgraded("wpa3-mixed", Crypt::Aes, Auth::Wpa2Enterprise, MIXED_WPA3),
    WifiMode::new("wpa2+tkip+ccmp", Crypt::TkipAes, Auth::Wpa2Enterprise),
    WifiMode::new("wpa2+tkip+aes", Crypt::TkipAes, Auth::Wpa2Enterprise),
    WifiMode::new("wpa2+ccmp", Crypt::Aes, Auth::Wpa2Enterprise),
    WifiMode::new("wpa2+aes", Crypt::Aes, Auth::Wpa2Enterprise),
    WifiMode::new("wpa2", Crypt::Aes, Auth::Wpa2Enterprise),
    WifiMode::new("wpa2+tkip", Crypt::Tkip, Auth::Wpa2Enterprise),
    WifiMode::new("wpa+tkip+ccmp", Crypt::TkipAes, Auth::WpaEnterprise),
    WifiMode::new("wpa+tkip+aes", Crypt::TkipAes, Auth::WpaEnterprise),
    WifiMode::new("wpa+ccmp", Crypt::Aes, Auth::WpaEnterprise),
    WifiMode::new("wpa+aes", Crypt::Aes, Auth::WpaEnterprise),
    WifiMode::new("wpa+tkip", Crypt::Tkip, Auth::WpaEnterprise),
    WifiMode::new("wpa", Crypt::Aes, Auth::WpaEnterprise),
    WifiMode::downgraded("wpa-mixed+tkip+ccmp", Crypt::TkipAes, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::downgraded("wpa-mixed+tkip+aes", Crypt::TkipAes, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::downgraded("wpa-mixed+tkip", Crypt::Tkip, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::downgraded("wpa-mixed+ccmp", Crypt::Aes, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::downgraded("wpa-mixed+aes", Crypt::Aes, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::downgraded("wpa-mixed", Crypt::Aes, Auth::Wpa2Enterprise, MIXED_WPA2),
    WifiMode::rejected("owe", NO_OWE),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("unknown encryption mode: {0}")]
    Unknown(String),
    #[error("{name}: {reason}")]
    Rejected { name: &'static str, reason: &'static str },
}

/// Look up an encryption mode by name
///
/// Downgraded modes are returned as `Ok`; the caller decides how to surface
/// the advisory message.
pub fn lookup_mode(name: &str) -> Result<&'static WifiMode, ModeError> {
    let mode = MODES
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| ModeError::Unknown(name.to_string()))?;

    match mode.support {
        ModeSupport::Rejected(reason) => Err(ModeError::Rejected { name: mode.name, reason }),
        _ => Ok(mode),
    }
}

/// Names of every mode that can be written to a tag
pub fn usable_modes() -> impl Iterator<Item = &'static WifiMode> {
    MODES.iter().filter(|m| m.is_usable())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("ssid must have between 2 and 28 characters (got {0})")]
    SsidLength(usize),
    #[error("password must have between 8 and 63 characters (got {0})")]
    PassphraseLength(usize),
}

pub fn validate_ssid(ssid: &[u8]) -> Result<(), CredentialError> {
    if (SSID_MIN..=SSID_MAX).contains(&ssid.len()) {
        Ok(())
    } else {
        Err(CredentialError::SsidLength(ssid.len()))
    }
}

pub fn validate_passphrase(passphrase: &[u8]) -> Result<(), CredentialError> {
    if (PASS_MIN..=PASS_MAX).contains(&passphrase.len()) {
        Ok(())
    } else {
        Err(CredentialError::PassphraseLength(passphrase.len()))
    }
}
