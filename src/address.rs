use std::fmt;

/// Globally unique name of an account, local or remote.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain part of the account, if it has one (`user@domain`).
    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, domain)| domain)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric id of one device of an account.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DeviceId> for u32 {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cryptographic endpoint: an account plus one of its devices.
///
/// Every device has its own session, so a message to an account is really
/// a message to each of its device addresses.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct DeviceAddress {
    account: AccountId,
    device_id: DeviceId,
}

impl DeviceAddress {
    pub fn new(account: impl Into<AccountId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            account: account.into(),
            device_id: device_id.into(),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Bytes bound into ciphertexts as associated data.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let name = self.account.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(name.len() + 4);
        bytes.extend_from_slice(name);
        bytes.extend_from_slice(&u32::from(self.device_id).to_be_bytes());
        bytes
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_address_display_and_order() {
        let a = DeviceAddress::new("alice@example.org", 2);
        let b = DeviceAddress::new("alice@example.org", 10);

        assert_eq!(a.to_string(), "alice@example.org:2");
        assert!(a < b);
        assert_eq!(a.account().domain(), Some("example.org"));
    }

    #[test]
    fn test_associated_bytes_differ_per_device() {
        let a = DeviceAddress::new("bob", 1);
        let b = DeviceAddress::new("bob", 2);

        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
