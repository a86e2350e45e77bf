//! Target context userdata.

use std::cell::RefCell;

use mlua::prelude::*;
use mlua::Variadic;

use crate::package::Command;

/// Userdata handed to a target's `run` function. Records the commands the
/// script declares, in order.
#[derive(Debug, Default)]
pub struct TargetCtx {
  commands: RefCell<Vec<Command>>,
}

impl TargetCtx {
  /// The recorded command sequence.
  pub fn into_commands(self) -> Vec<Command> {
    self.commands.into_inner()
  }
}

impl LuaUserData for TargetCtx {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    // ctx:exec("cc", "-o", "app", "main.c")
    methods.add_method("exec", |_, this, args: Variadic<String>| {
      if args.is_empty() {
        return Err(LuaError::external("exec requires at least a program name"));
      }
      this.commands.borrow_mut().push(Command::Exec {
        args: args.into_iter().collect(),
      });
      Ok(())
    });

    // ctx:shell("echo built on $(uname)")
    methods.add_method("shell", |_, this, source: String| {
      this.commands.borrow_mut().push(Command::Shell { source });
      Ok(())
    });
  }
}
