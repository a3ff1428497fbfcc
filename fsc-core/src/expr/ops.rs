//! Arithmetic primitives of the control-expression language.
//!
//! Every value flowing through an expression may be absent (`None`), e.g. a
//! sensor that did not report. Binary operators absorb an absent operand:
//! `x op None == x` and `None op x == x`, so a single missing reading never
//! poisons a whole computation. Division by zero yields the dividend.

/// Binary operator of an infix node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Sum,
    Sub,
    Mul,
    Div,
}

impl InfixOp {
    /// Look up an operator by its source symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(InfixOp::Sum),
            "-" => Some(InfixOp::Sub),
            "*" => Some(InfixOp::Mul),
            "/" => Some(InfixOp::Div),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Sum => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
        }
    }

    pub fn apply(self, lhs: Option<f64>, rhs: Option<f64>) -> Option<f64> {
        match (lhs, rhs) {
            (Some(a), Some(b)) => Some(match self {
                InfixOp::Sum => a + b,
                InfixOp::Sub => a - b,
                InfixOp::Mul => a * b,
                InfixOp::Div if b == 0.0 => a,
                InfixOp::Div => a / b,
            }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Stateful "last known good value" filter.
///
/// Passes present values through and remembers them; an absent input
/// returns the remembered value (absent until the first present one).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hold {
    last: Option<f64>,
}

impl Hold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, value: Option<f64>) -> Option<f64> {
        if value.is_some() {
            self.last = value;
        }
        self.last
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

/// Maximum over the truthy members of a list.
///
/// Absent and zero entries are ignored; `None` when nothing remains.
pub fn max_of(items: &[Option<f64>]) -> Option<f64> {
    items
        .iter()
        .flatten()
        .copied()
        .filter(|v| *v != 0.0)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
}

/// A value is truthy when present and non-zero.
pub fn is_truthy(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v != 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_operand_is_absorbed() {
        for op in [InfixOp::Sum, InfixOp::Sub, InfixOp::Mul, InfixOp::Div] {
            assert_eq!(op.apply(Some(4.0), None), Some(4.0), "{}", op.symbol());
            assert_eq!(op.apply(None, Some(4.0)), Some(4.0), "{}", op.symbol());
            assert_eq!(op.apply(None, None), None, "{}", op.symbol());
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(InfixOp::Sum.apply(Some(2.0), Some(3.0)), Some(5.0));
        assert_eq!(InfixOp::Sub.apply(Some(2.0), Some(3.0)), Some(-1.0));
        assert_eq!(InfixOp::Mul.apply(Some(2.0), Some(3.0)), Some(6.0));
        assert_eq!(InfixOp::Div.apply(Some(9.0), Some(3.0)), Some(3.0));
    }

    #[test]
    fn test_division_by_zero_returns_dividend() {
        assert_eq!(InfixOp::Div.apply(Some(7.0), Some(0.0)), Some(7.0));
        assert_eq!(InfixOp::Div.apply(Some(-2.5), Some(0.0)), Some(-2.5));
    }

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(InfixOp::from_symbol("*"), Some(InfixOp::Mul));
        assert_eq!(InfixOp::from_symbol("%"), None);
        assert_eq!(InfixOp::from_symbol("/").map(InfixOp::symbol), Some("/"));
    }

    #[test]
    fn test_hold_sequence() {
        let mut hold = Hold::new();
        let inputs = [Some(5.0), None, None, Some(7.0), None];
        let outputs: Vec<_> = inputs.iter().map(|v| hold.apply(*v)).collect();
        assert_eq!(
            outputs,
            vec![Some(5.0), Some(5.0), Some(5.0), Some(7.0), Some(7.0)]
        );
    }

    #[test]
    fn test_hold_before_first_value() {
        let mut hold = Hold::new();
        assert_eq!(hold.apply(None), None);
        assert_eq!(hold.last(), None);
    }

    #[test]
    fn test_max_ignores_absent_and_zero() {
        assert_eq!(max_of(&[Some(3.0), None, Some(9.0)]), Some(9.0));
        assert_eq!(max_of(&[Some(0.0), None]), None);
        assert_eq!(max_of(&[]), None);
        assert_eq!(max_of(&[Some(-4.0), Some(0.0)]), Some(-4.0));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(Some(0.1)));
        assert!(!is_truthy(Some(0.0)));
        assert!(!is_truthy(None));
    }
}
