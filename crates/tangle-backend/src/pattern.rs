//! Rule body combinators.

use std::fmt::Display;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Assoc {
    #[default]
    None,
    Left,
    Right,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PrecLevel {
    Number(i32),
    /// Declared with [`crate::Grammar::precedences`].
    Named(String),
}

impl From<i32> for PrecLevel {
    fn from(value: i32) -> Self {
        PrecLevel::Number(value)
    }
}

impl From<&str> for PrecLevel {
    fn from(value: &str) -> Self {
        PrecLevel::Named(value.to_owned())
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Pattern {
    Blank,
    /// A rule, a named terminal or an external token.
    Symbol(String),
    /// A literal terminal.
    Token(String),
    Seq(Vec<Pattern>),
    Choice(Vec<Pattern>),
    Repeat(Box<Pattern>),
    Repeat1(Box<Pattern>),
    Optional(Box<Pattern>),
    Field(String, Box<Pattern>),
    Prec {
        level: PrecLevel,
        assoc: Assoc,
        pattern: Box<Pattern>,
    },
    PrecDynamic(i32, Box<Pattern>),
    Alias(String, Box<Pattern>),
}

impl Pattern {
    /// Direct subpatterns.
    pub fn children(&self) -> &[Pattern] {
        match self {
            Pattern::Blank | Pattern::Symbol(_) | Pattern::Token(_) => &[],
            Pattern::Seq(children) | Pattern::Choice(children) => children,
            Pattern::Repeat(p)
            | Pattern::Repeat1(p)
            | Pattern::Optional(p)
            | Pattern::Field(_, p)
            | Pattern::Prec { pattern: p, .. }
            | Pattern::PrecDynamic(_, p)
            | Pattern::Alias(_, p) => std::slice::from_ref(&**p),
        }
    }

    /// Calls `fun` on this pattern and all of its descendants, parents first.
    pub fn visit<'a>(&'a self, fun: &mut dyn FnMut(&'a Pattern)) {
        fun(self);
        for child in self.children() {
            child.visit(fun);
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = |f: &mut std::fmt::Formatter<'_>, name: &str, children: &[Pattern]| {
            write!(f, "{name}(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{child}")?;
            }
            f.write_str(")")
        };
        match self {
            Pattern::Blank => f.write_str("blank()"),
            Pattern::Symbol(name) => f.write_str(name),
            Pattern::Token(text) => write!(f, "{text:?}"),
            Pattern::Seq(children) => list(f, "seq", children),
            Pattern::Choice(children) => list(f, "choice", children),
            Pattern::Repeat(p) => write!(f, "repeat({p})"),
            Pattern::Repeat1(p) => write!(f, "repeat1({p})"),
            Pattern::Optional(p) => write!(f, "optional({p})"),
            Pattern::Field(name, p) => write!(f, "field({name}, {p})"),
            Pattern::Prec {
                level,
                assoc,
                pattern,
            } => {
                let name = match assoc {
                    Assoc::None => "prec",
                    Assoc::Left => "prec_left",
                    Assoc::Right => "prec_right",
                };
                match level {
                    PrecLevel::Number(n) => write!(f, "{name}({n}, {pattern})"),
                    PrecLevel::Named(level) => write!(f, "{name}({level:?}, {pattern})"),
                }
            }
            Pattern::PrecDynamic(n, p) => write!(f, "prec_dynamic({n}, {p})"),
            Pattern::Alias(name, p) => write!(f, "alias({p}, {name})"),
        }
    }
}

pub fn blank() -> Pattern {
    Pattern::Blank
}

pub fn sym(name: &str) -> Pattern {
    Pattern::Symbol(name.to_owned())
}

pub fn tok(text: &str) -> Pattern {
    Pattern::Token(text.to_owned())
}

pub fn seq(patterns: impl IntoIterator<Item = Pattern>) -> Pattern {
    Pattern::Seq(patterns.into_iter().collect())
}

pub fn choice(patterns: impl IntoIterator<Item = Pattern>) -> Pattern {
    Pattern::Choice(patterns.into_iter().collect())
}

pub fn repeat(pattern: Pattern) -> Pattern {
    Pattern::Repeat(Box::new(pattern))
}

pub fn repeat1(pattern: Pattern) -> Pattern {
    Pattern::Repeat1(Box::new(pattern))
}

pub fn optional(pattern: Pattern) -> Pattern {
    Pattern::Optional(Box::new(pattern))
}

pub fn field(name: &str, pattern: Pattern) -> Pattern {
    Pattern::Field(name.to_owned(), Box::new(pattern))
}

pub fn prec(level: impl Into<PrecLevel>, pattern: Pattern) -> Pattern {
    Pattern::Prec {
        level: level.into(),
        assoc: Assoc::None,
        pattern: Box::new(pattern),
    }
}

pub fn prec_left(level: impl Into<PrecLevel>, pattern: Pattern) -> Pattern {
    Pattern::Prec {
        level: level.into(),
        assoc: Assoc::Left,
        pattern: Box::new(pattern),
    }
}

pub fn prec_right(level: impl Into<PrecLevel>, pattern: Pattern) -> Pattern {
    Pattern::Prec {
        level: level.into(),
        assoc: Assoc::Right,
        pattern: Box::new(pattern),
    }
}

pub fn prec_dynamic(value: i32, pattern: Pattern) -> Pattern {
    Pattern::PrecDynamic(value, Box::new(pattern))
}

/// Shows `pattern`, which has to be a single symbol or token, under another name.
pub fn alias(pattern: Pattern, name: &str) -> Pattern {
    Pattern::Alias(name.to_owned(), Box::new(pattern))
}

/// One or more `pattern` separated by `separator`.
pub fn sep1(pattern: Pattern, separator: &str) -> Pattern {
    seq([pattern.clone(), repeat(seq([tok(separator), pattern]))])
}

pub fn sep(pattern: Pattern, separator: &str) -> Pattern {
    optional(sep1(pattern, separator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reads_like_the_builder() {
        let pattern = prec_left(
            "add",
            seq([field("left", sym("_expression")), tok("+"), optional(sym("x"))]),
        );
        assert_eq!(
            pattern.to_string(),
            r#"prec_left("add", seq(field(left, _expression), "+", optional(x)))"#
        );
    }

    #[test]
    fn visit_reaches_nested_symbols() {
        let pattern = sep1(alias(sym("identifier"), "field_identifier"), ",");
        let mut names = Vec::new();
        pattern.visit(&mut |p| {
            if let Pattern::Symbol(name) = p {
                names.push(name.as_str());
            }
        });
        assert_eq!(names, ["identifier", "identifier"]);
    }
}
