//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod compliance {
    use super::*;
    use crate::payments::types::PaymentMethod;

    pub const NAMESPACE: &str = "compliance";

    /// Regional profile entry: `v1:compliance:{kind}:{region}`
    #[derive(Debug, Clone)]
    pub struct ProfileKey {
        pub kind: &'static str,
        pub region: String,
    }

    impl ProfileKey {
        pub fn new(kind: &'static str, region: impl Into<String>) -> Self {
            Self {
                kind,
                region: region.into().to_lowercase(),
            }
        }
    }

    impl fmt::Display for ProfileKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}:{}", VERSION, NAMESPACE, self.kind, self.region)
        }
    }

    /// Efficiency score for a method in a region or region pair.
    #[derive(Debug, Clone)]
    pub struct EfficiencyKey {
        pub scope: String,
        pub method: PaymentMethod,
    }

    impl EfficiencyKey {
        pub fn domestic(region: &str, method: PaymentMethod) -> Self {
            Self {
                scope: region.to_lowercase(),
                method,
            }
        }

        pub fn cross_border(source: &str, destination: &str, method: PaymentMethod) -> Self {
            Self {
                scope: format!("{}_to_{}", source.to_lowercase(), destination.to_lowercase()),
                method,
            }
        }
    }

    impl fmt::Display for EfficiencyKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:efficiency:{}:{}",
                VERSION,
                NAMESPACE,
                self.scope,
                self.method.as_str()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::compliance::*;
    use crate::payments::types::PaymentMethod;

    #[test]
    fn profile_keys_are_versioned_and_lowercased() {
        let key = ProfileKey::new("tax", "KE");
        assert_eq!(key.to_string(), "v1:compliance:tax:ke");
    }

    #[test]
    fn efficiency_keys_distinguish_cross_border() {
        let domestic = EfficiencyKey::domestic("KE", PaymentMethod::MobileMoney);
        let cross = EfficiencyKey::cross_border("KE", "NG", PaymentMethod::MobileMoney);
        assert_eq!(domestic.to_string(), "v1:compliance:efficiency:ke:mobile_money");
        assert_eq!(
            cross.to_string(),
            "v1:compliance:efficiency:ke_to_ng:mobile_money"
        );
    }
}
