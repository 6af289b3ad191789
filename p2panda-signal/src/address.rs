// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SignalProtocolError;

/// Identifies one device of an account.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote party of a session: account name plus device.
///
/// Every session, identity and lock is keyed by this address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    name: String,
    device_id: DeviceId,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

pub const UUID_SIZE: usize = 16;

/// 128-bit account identifier in its binary form.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uuid([u8; UUID_SIZE]);

impl Uuid {
    pub fn from_bytes(bytes: [u8; UUID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        &self.0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl FromStr for Uuid {
    type Err = SignalProtocolError;

    /// Accepts the hyphenated form as well as 32 plain hex digits.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || SignalProtocolError::InvalidArgument(format!("invalid uuid {value}"));
        let digits: String = match value.len() {
            36 => {
                for position in [8, 13, 18, 23] {
                    if value.as_bytes()[position] != b'-' {
                        return Err(invalid());
                    }
                }
                value.chars().filter(|c| *c != '-').collect()
            }
            32 => value.to_owned(),
            _ => return Err(invalid()),
        };
        let bytes = hex::decode(digits).map_err(|_| invalid())?;
        let bytes: [u8; UUID_SIZE] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}

/// Kind of account identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceIdKind {
    /// Account identity.
    Aci,

    /// Phone number identity.
    Pni,
}

impl ServiceIdKind {
    fn type_byte(&self) -> u8 {
        match self {
            ServiceIdKind::Aci => 0x00,
            ServiceIdKind::Pni => 0x01,
        }
    }
}

/// Size of the fixed-width binary encoding: one kind byte plus the uuid.
pub const SERVICE_ID_FIXED_WIDTH_SIZE: usize = UUID_SIZE + 1;

/// Account identifier addressed by sealed sender v2.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    kind: ServiceIdKind,
    uuid: Uuid,
}

impl ServiceId {
    pub fn aci(uuid: Uuid) -> Self {
        Self {
            kind: ServiceIdKind::Aci,
            uuid,
        }
    }

    pub fn pni(uuid: Uuid) -> Self {
        Self {
            kind: ServiceIdKind::Pni,
            uuid,
        }
    }

    pub fn kind(&self) -> ServiceIdKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn service_id_fixed_width_binary(&self) -> [u8; SERVICE_ID_FIXED_WIDTH_SIZE] {
        let mut out = [0u8; SERVICE_ID_FIXED_WIDTH_SIZE];
        out[0] = self.kind.type_byte();
        out[1..].copy_from_slice(self.uuid.as_bytes());
        out
    }

    pub fn parse_from_service_id_fixed_width_binary(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; SERVICE_ID_FIXED_WIDTH_SIZE] = bytes.try_into().ok()?;
        let uuid = Uuid::from_bytes(bytes[1..].try_into().ok()?);
        match bytes[0] {
            0x00 => Some(Self::aci(uuid)),
            0x01 => Some(Self::pni(uuid)),
            _ => None,
        }
    }

    /// `<uuid>` for account identities, `PNI:<uuid>` for phone number identities.
    pub fn service_id_string(&self) -> String {
        match self.kind {
            ServiceIdKind::Aci => self.uuid.to_string(),
            ServiceIdKind::Pni => format!("PNI:{}", self.uuid),
        }
    }

    pub fn parse_from_service_id_string(value: &str) -> Option<Self> {
        match value.strip_prefix("PNI:") {
            Some(uuid) => Uuid::from_str(uuid).ok().map(Self::pni),
            None => Uuid::from_str(value).ok().map(Self::aci),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service_id_string())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{DeviceId, ProtocolAddress, ServiceId, ServiceIdKind, Uuid};

    const UUID: &str = "9d0652a3-dcc3-4d11-975f-74d61598733f";

    #[test]
    fn address_display() {
        let address = ProtocolAddress::new("+14151111111", DeviceId::new(1));
        assert_eq!(address.to_string(), "+14151111111.1");
    }

    #[test]
    fn uuid_string_forms() {
        let uuid = Uuid::from_str(UUID).unwrap();
        assert_eq!(uuid.to_string(), UUID);
        assert_eq!(Uuid::from_str(&UUID.replace('-', "")).unwrap(), uuid);
        assert!(Uuid::from_str("9d0652a3-dcc3-4d11-975f").is_err());
        assert!(Uuid::from_str("9d0652a3xdcc3-4d11-975f-74d61598733f").is_err());
    }

    #[test]
    fn service_id_encodings() {
        let uuid = Uuid::from_str(UUID).unwrap();

        let aci = ServiceId::aci(uuid);
        assert_eq!(aci.service_id_string(), UUID);
        assert_eq!(aci.service_id_fixed_width_binary()[0], 0x00);
        assert_eq!(ServiceId::parse_from_service_id_string(UUID), Some(aci));

        let pni = ServiceId::pni(uuid);
        assert_eq!(pni.service_id_string(), format!("PNI:{UUID}"));
        let binary = pni.service_id_fixed_width_binary();
        assert_eq!(binary[0], 0x01);
        assert_eq!(&binary[1..], uuid.as_bytes());
        let parsed = ServiceId::parse_from_service_id_fixed_width_binary(&binary).unwrap();
        assert_eq!(parsed.kind(), ServiceIdKind::Pni);

        let mut unknown_kind = binary;
        unknown_kind[0] = 0x02;
        assert!(ServiceId::parse_from_service_id_fixed_width_binary(&unknown_kind).is_none());
    }
}
