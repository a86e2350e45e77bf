//! Target labels.
//!
//! A label is a qualified reference to a target in a package, written
//! `package:target`. An empty package means the current package; an empty
//! target means the default target.

use std::fmt;

/// A reference to a package and target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Label {
  /// Package half of the reference. Empty means the current package.
  pub package: String,

  /// Target half of the reference. Empty means the default target.
  pub target: String,
}

impl Label {
  /// Parse a label from its textual form.
  ///
  /// The string is split on the first `:`. Without a colon the whole string
  /// is the target and the package is empty. Both halves are copied
  /// verbatim; no normalization is applied.
  pub fn parse(s: &str) -> Self {
    match s.split_once(':') {
      Some((package, target)) => Self {
        package: package.to_string(),
        target: target.to_string(),
      },
      None => Self {
        package: String::new(),
        target: s.to_string(),
      },
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !self.package.is_empty() {
      write!(f, "{}:", self.package)?;
    }
    write!(f, "{}", self.target)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_package_and_target() {
    let label = Label::parse("mypkg:bin/app");
    assert_eq!(label.package, "mypkg");
    assert_eq!(label.target, "bin/app");
  }

  #[test]
  fn parse_without_colon_is_bare_target() {
    let label = Label::parse("bin/app");
    assert_eq!(label.package, "");
    assert_eq!(label.target, "bin/app");
  }

  #[test]
  fn parse_splits_on_first_colon_only() {
    let label = Label::parse("a:b:c");
    assert_eq!(label.package, "a");
    assert_eq!(label.target, "b:c");
  }

  #[test]
  fn parse_empty_halves() {
    let label = Label::parse(":");
    assert_eq!(label.package, "");
    assert_eq!(label.target, "");

    let label = Label::parse("pkg:");
    assert_eq!(label.package, "pkg");
    assert_eq!(label.target, "");
  }

  #[test]
  fn display_round_trips() {
    assert_eq!(Label::parse("pkg:t").to_string(), "pkg:t");
    assert_eq!(Label::parse("t").to_string(), "t");
  }
}
