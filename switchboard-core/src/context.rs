//! Opaque connection context passed from the facade to `Protocol::init`.

/// Ordered list of free-form arguments (credentials and the like).
///
/// The facade never interprets these values; order is preserved and meaning is
/// backend-defined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionContext {
    args: Vec<String>,
}

impl ConnectionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument.
    pub fn push(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    /// Arguments in insertion order.
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if no argument was supplied.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ConnectionContext {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_preserved() {
        let mut ctx = ConnectionContext::new();
        ctx.push("user");
        ctx.push("secret");
        assert_eq!(ctx.as_slice(), ["user", "secret"]);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_collect() {
        let ctx: ConnectionContext = ["a", "b", "c"].into_iter().collect();
        assert_eq!(ctx.as_slice(), ["a", "b", "c"]);
        assert!(!ctx.is_empty());
    }
}
