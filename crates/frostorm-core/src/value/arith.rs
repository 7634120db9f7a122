use super::{Value, ValueError};
use std::fmt;

///
/// ArithmeticOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }

    /// Binding strength; multiplicative operators bind tighter.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div | Self::Mod => 2,
        }
    }

    /// Apply the operator with Int/Float promotion. Null propagates.
    pub fn apply(self, left: &Value, right: &Value) -> Result<Value, ValueError> {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }

        match (left, right) {
            (Value::Int(a), Value::Int(b)) => self.apply_int(*a, *b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return Err(self.mismatch(left, right));
                };
                self.apply_float(a, b)
            }
            (Value::Text(a), Value::Text(b)) if self == Self::Add => {
                Ok(Value::Text(format!("{a}{b}")))
            }
            _ => Err(self.mismatch(left, right)),
        }
    }

    fn apply_int(self, a: i64, b: i64) -> Result<Value, ValueError> {
        let out = match self {
            Self::Add => a.checked_add(b),
            Self::Sub => a.checked_sub(b),
            Self::Mul => a.checked_mul(b),
            Self::Div => {
                if b == 0 {
                    return Err(ValueError::DivisionByZero);
                }
                a.checked_div(b)
            }
            Self::Mod => {
                if b == 0 {
                    return Err(ValueError::DivisionByZero);
                }
                a.checked_rem(b)
            }
        };

        out.map(Value::Int)
            .ok_or(ValueError::Overflow { op: self })
    }

    fn apply_float(self, a: f64, b: f64) -> Result<Value, ValueError> {
        if matches!(self, Self::Div | Self::Mod) && b == 0.0 {
            return Err(ValueError::DivisionByZero);
        }

        let out = match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Mod => a % b,
        };

        Ok(Value::Float(out))
    }

    fn mismatch(self, left: &Value, right: &Value) -> ValueError {
        ValueError::TypeMismatch {
            op: self,
            left: left.clone(),
            right: right.clone(),
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Value {
    /// Arithmetic negation; Null propagates.
    pub fn negate(&self) -> Result<Self, ValueError> {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Int(v) => v
                .checked_neg()
                .map(Self::Int)
                .ok_or(ValueError::Overflow {
                    op: ArithmeticOp::Sub,
                }),
            Self::Float(v) => Ok(Self::Float(-v)),
            other => Err(ValueError::TypeMismatch {
                op: ArithmeticOp::Sub,
                left: Self::Int(0),
                right: other.clone(),
            }),
        }
    }
}
