//! Identifier types for fleet entities.
//!
//! The fleet-management API uses integer primary keys for devices, fleets and
//! environment variables. Wrapping them keeps a device id from being passed
//! where a fleet id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw API id.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Return the raw API id.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse()
                    .map(Self)
                    .map_err(|_| CoreError::InvalidId(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Primary key of a device.
    ///
    /// The derived `Ord` is the total order used for server election: every
    /// resolver that sees the same set of candidates picks the same minimum.
    DeviceId
);

numeric_id!(
    /// Primary key of a fleet (an "application" in the balena API).
    FleetId
);

numeric_id!(
    /// Primary key of an environment variable record.
    VarId
);

impl FleetId {
    /// Fleet id reported by devices running in local development mode.
    pub const LOCAL_DEV: Self = Self(1);

    /// Whether this is the local development sentinel.
    #[must_use]
    pub const fn is_local_dev(self) -> bool {
        self.0 == Self::LOCAL_DEV.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_totally_ordered() {
        let mut ids = vec![DeviceId::new(9), DeviceId::new(2), DeviceId::new(5)];
        ids.sort();
        assert_eq!(ids, vec![DeviceId::new(2), DeviceId::new(5), DeviceId::new(9)]);
        assert_eq!(ids.iter().min(), Some(&DeviceId::new(2)));
    }

    #[test]
    fn numeric_not_lexical_order() {
        assert!(DeviceId::new(10) > DeviceId::new(9));
    }

    #[test]
    fn parse_fleet_id() {
        assert_eq!("42".parse::<FleetId>().unwrap(), FleetId::new(42));
        assert_eq!(" 7 ".parse::<FleetId>().unwrap(), FleetId::new(7));
        assert!(matches!(
            "abc".parse::<FleetId>(),
            Err(CoreError::InvalidId(s)) if s == "abc"
        ));
    }

    #[test]
    fn local_dev_sentinel() {
        assert!(FleetId::new(1).is_local_dev());
        assert!(!FleetId::new(1_234_567).is_local_dev());
    }

    #[test]
    fn serde_transparent() {
        let json = serde_json::to_string(&DeviceId::new(17)).unwrap();
        assert_eq!(json, "17");
        let back: DeviceId = serde_json::from_str("17").unwrap();
        assert_eq!(back, DeviceId::new(17));
    }

    #[test]
    fn display_and_debug() {
        assert_eq!(VarId::new(3).to_string(), "3");
        assert_eq!(format!("{:?}", VarId::new(3)), "VarId(3)");
    }
}
