//! Variable resolution for attribute values
//!
//! A resolver is a pure `&str -> String` function. Resolvers compose:
//! `append_resolver(a, b)` applies `a`, then `b`.
//!
//! Placeholders have the form `${KEY}` and are replaced literally, one key at
//! a time, in a single pass. Unknown placeholders stay in the output.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The one variable the runner defines: directory of the selected kernel.
pub const KERNEL_DIR: &str = "KERNEL_DIR";

/// A composable string rewriting function.
#[derive(Clone)]
pub struct VariableResolver {
    func: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl VariableResolver {
    /// Wrap an arbitrary function.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self { func: Arc::new(func) }
    }

    /// Identity resolver.
    pub fn identity() -> Self {
        Self::from_fn(|value| value.to_string())
    }

    /// Replace `${KEY}` with the mapped value for every entry, in order.
    pub fn from_variables<I, K, V>(variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let substitutions: Vec<(String, String)> = variables
            .into_iter()
            .map(|(k, v)| (format!("${{{}}}", k.as_ref()), v.into()))
            .collect();

        Self::from_fn(move |value| {
            substitutions
                .iter()
                .fold(value.to_string(), |acc, (placeholder, replacement)| {
                    acc.replace(placeholder.as_str(), replacement)
                })
        })
    }

    /// Resolver binding `KERNEL_DIR` to the parent directory of `kernel`.
    ///
    /// A bare file name binds `.`. Yields the identity when `kernel` has no
    /// parent at all (empty or a root).
    pub fn for_kernel(kernel: &str) -> Self {
        match Path::new(kernel).parent() {
            Some(dir) if dir.as_os_str().is_empty() => Self::from_variables([(KERNEL_DIR, ".")]),
            Some(dir) => Self::from_variables([(KERNEL_DIR, dir.to_string_lossy().into_owned())]),
            None => Self::identity(),
        }
    }

    /// Apply `self`, then `extra`.
    pub fn then(self, extra: VariableResolver) -> Self {
        Self::from_fn(move |value| extra.resolve(&self.resolve(value)))
    }

    pub fn resolve(&self, value: &str) -> String {
        (self.func)(value)
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for VariableResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VariableResolver(..)")
    }
}

/// Identity resolver, used when no layer-derived context exists.
pub fn resolve_no_variables() -> VariableResolver {
    VariableResolver::identity()
}

/// Resolver that applies `base` first, then `extra`.
pub fn append_resolver(base: VariableResolver, extra: VariableResolver) -> VariableResolver {
    base.then(extra)
}

/// Resolver substituting `${KEY}` placeholders from a mapping.
pub fn make_resolver_from_dict<I, K, V>(variables: I) -> VariableResolver
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    VariableResolver::from_variables(variables)
}

/// Names of `${...}` placeholders left in `value`.
pub fn unresolved_placeholders(value: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                names.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}
