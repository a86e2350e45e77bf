//! The `target` global.
//!
//! Registers the single entry point build scripts use to declare targets.
//! The package being built is shared with the closure through
//! `Rc<RefCell<…>>`; evaluation is single-threaded.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mlua::prelude::*;

use crate::package::{Package, Target};

use super::ctx::TargetCtx;

/// Register the `target(name, spec)` global in the Lua runtime.
pub fn register_globals(lua: &Lua, package: Rc<RefCell<Package>>) -> LuaResult<()> {
  let target_fn = lua.create_function(move |lua, (name, spec): (String, Option<LuaTable>)| {
    // A leading at-sign marks the target phony.
    let (name, phony) = match name.strip_prefix('@') {
      Some(stripped) => (stripped.to_string(), true),
      None => (name, false),
    };

    if name.is_empty() {
      return Err(LuaError::external("target name must not be empty"));
    }
    if package.borrow().targets.iter().any(|t| t.name == name) {
      return Err(LuaError::external(format!("duplicate target name: {name}")));
    }

    let mut target = Target {
      name: name.clone(),
      phony,
      ..Target::default()
    };

    if let Some(spec) = spec {
      target.inputs = spec.get::<Option<Vec<String>>>("inputs")?.unwrap_or_default();
      target.outputs = spec.get::<Option<Vec<String>>>("outputs")?.unwrap_or_default();
      target.title = spec.get::<Option<String>>("title")?;
      target.work_dir = spec.get::<Option<String>>("workdir")?.unwrap_or_default();

      // The run function executes immediately against a recording context;
      // the commands it declares run later, at build time.
      if let Some(run) = spec.get::<Option<LuaFunction>>("run")? {
        let ctx = lua.create_userdata(TargetCtx::default())?;
        run.call::<()>(&ctx)?;
        target.commands = ctx.take::<TargetCtx>()?.into_commands();
      }
    }

    package.borrow_mut().targets.push(Arc::new(target));

    // Hand the name back so scripts can wire it into other targets'
    // inputs.
    Ok(name)
  })?;

  lua.globals().set("target", target_fn)?;
  Ok(())
}
