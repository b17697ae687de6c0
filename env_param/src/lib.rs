//! Global tuning parameters initialized from environment variables.
//!
//! An [`EnvParam`] couples the name of an environment variable with a default
//! value encoded as a string. The parameter is resolved once, on first
//! access: if the environment variable is set and parses, its value is used,
//! otherwise the default applies. Later changes to the environment are
//! ignored.
//!
//! ```
//! use env_param::EnvParam;
//! static LIMIT: EnvParam<u32> = EnvParam::new("DOCTEST_UNSET_LIMIT", "16");
//!
//! assert_eq!(LIMIT.get(), 16);
//! ```
//!
//! The intended use is for internal knobs that should be tunable without
//! widening the command-line surface.

use std::str::FromStr;
use std::sync::OnceLock;

pub struct EnvParam<T> {
    value: OnceLock<T>,
    env: &'static str,
    default: &'static str,
}

impl<T> EnvParam<T> {
    /// Declares a parameter read from the environment variable `env`, with
    /// `default` as the fallback value.
    pub const fn new(env: &'static str, default: &'static str) -> EnvParam<T> {
        EnvParam {
            value: OnceLock::new(),
            env,
            default,
        }
    }
}

impl<T: FromStr> EnvParam<T> {
    fn parse_default(&self) -> T {
        match T::from_str(self.default) {
            Ok(v) => v,
            Err(_) => panic!("[env_param] {}: invalid default value \"{}\"", self.env, self.default),
        }
    }

    /// Resolves the parameter on first access and returns it.
    ///
    /// A warning is printed if the environment variable is set but does not
    /// parse; the default is used in that case. Panics only if the default
    /// itself does not parse.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        *self.get_ref()
    }

    /// Same as [`EnvParam::get`] but returns a reference, for non-`Copy`
    /// parameter types.
    pub fn get_ref(&self) -> &T {
        self.value.get_or_init(|| match std::env::var(self.env) {
            Ok(raw) => match T::from_str(&raw) {
                Ok(value) => value,
                Err(_) => {
                    eprintln!(
                        "[env_param] WARNING: could not parse \"{}\" for environment variable {}; using default \"{}\"",
                        raw, self.env, self.default
                    );
                    self.parse_default()
                }
            },
            Err(_) => self.parse_default(),
        })
    }

    /// Forces the parameter to `value`.
    ///
    /// # Panics
    /// Panics if the parameter was already resolved, typically because it was
    /// already read.
    pub fn set(&self, value: T) {
        if self.value.set(value).is_err() {
            panic!("Parameter {} is already initialized (i.e. was previously accessed).", self.env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_applies_when_unset() {
        static P: EnvParam<u64> = EnvParam::new("ENV_PARAM_TEST_UNSET", "42");
        assert_eq!(P.get(), 42);
    }

    #[test]
    fn set_before_read_wins() {
        static P: EnvParam<u64> = EnvParam::new("ENV_PARAM_TEST_SET", "1");
        P.set(9);
        assert_eq!(P.get(), 9);
    }
}
