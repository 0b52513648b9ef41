//! Embedded Lua interpreter for uploaded programs.
//!
//! Each run gets a fresh `Lua` state with only the `string`, `table` and
//! `math` libraries, the base library minus the chunk loaders, and the
//! device capability tables below. Nothing else on the device is
//! reachable from a program.
//!
//! # Usage in Lua
//!
//! ```lua
//! print("blink start")
//! while not should_stop() do
//!     pin.toggle(4)
//!     time.sleep_ms(250)
//! end
//! print("free heap", mem.free())
//! ```
//!
//! | Global            | Capability                                  |
//! |-------------------|---------------------------------------------|
//! | `print(...)`      | one `OUTPUT` event, args joined by spaces   |
//! | `should_stop()`   | cooperative cancellation flag               |
//! | `time.sleep_ms`   | block the worker for `ms` milliseconds      |
//! | `time.ticks_ms`   | milliseconds since boot                     |
//! | `pin.write(n, v)` | drive an allow-listed GPIO (bool or number) |
//! | `pin.read(n)`     | sample a GPIO, returns 0 or 1               |
//! | `pin.toggle(n)`   | invert a GPIO, returns the new level        |
//! | `mem.free/used`   | heap figures in bytes                       |
//! | `fs.list/exists`  | stored file names                           |

use anyhow::{Result, anyhow};
use log::debug;
use mlua::{Lua, LuaOptions, StdLib, Value, Variadic};

use crate::app::ports::Interpreter;
use crate::app::supervisor::ProgramEnv;

/// Chunk name shown in fault messages.
const CHUNK_NAME: &str = "program";

/// Stateless: every [`Interpreter::run`] builds and drops its own state.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaInterpreter;

impl LuaInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn sandbox(env: &ProgramEnv) -> Result<Lua> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            LuaOptions::new(),
        )
        .map_err(|e| anyhow!("Failed to create Lua state: {e}"))?;

        let globals = lua.globals();
        for name in ["dofile", "loadfile", "load"] {
            globals
                .set(name, Value::Nil)
                .map_err(|e| anyhow!("Failed to remove {name}: {e}"))?;
        }

        register_print(&lua, env.clone())?;
        register_control(&lua, env.clone())?;
        register_time(&lua, env.clone())?;
        register_pin(&lua, env.clone())?;
        register_mem(&lua, env.clone())?;
        register_fs(&lua, env.clone())?;
        Ok(lua)
    }
}

impl Interpreter for LuaInterpreter {
    fn run(&self, source: &str, env: ProgramEnv) -> Result<(), String> {
        let lua = Self::sandbox(&env).map_err(|e| e.to_string())?;
        debug!("LUA: executing {} bytes", source.len());
        lua.load(source)
            .set_name(CHUNK_NAME)
            .exec()
            .map_err(|e| e.to_string())
    }
}

fn runtime_err(e: impl core::fmt::Display) -> mlua::Error {
    mlua::Error::RuntimeError(e.to_string())
}

// ── Registration ──────────────────────────────────────────────

/// `print(...)`: `tostring` each argument, join with a space.
fn register_print(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let print_fn = lua
        .create_function(move |lua, args: Variadic<Value>| {
            let tostring: mlua::Function = lua.globals().get("tostring")?;
            let mut parts = Vec::with_capacity(args.len());
            for arg in args.iter() {
                parts.push(tostring.call::<String>(arg.clone())?);
            }
            env.print(&parts.join(" "));
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create print function: {e}"))?;
    lua.globals()
        .set("print", print_fn)
        .map_err(|e| anyhow!("Failed to set print: {e}"))?;
    Ok(())
}

fn register_control(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let stop_fn = lua
        .create_function(move |_, ()| Ok(env.should_stop()))
        .map_err(|e| anyhow!("Failed to create should_stop function: {e}"))?;
    lua.globals()
        .set("should_stop", stop_fn)
        .map_err(|e| anyhow!("Failed to set should_stop: {e}"))?;
    Ok(())
}

fn register_time(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create time table: {e}"))?;

    let sleeper = env.clone();
    let sleep_fn = lua
        .create_function(move |_, ms: u64| {
            sleeper.sleep_ms(ms);
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create time.sleep_ms function: {e}"))?;
    table
        .set("sleep_ms", sleep_fn)
        .map_err(|e| anyhow!("Failed to set time.sleep_ms: {e}"))?;

    let ticks_fn = lua
        .create_function(move |_, ()| Ok(env.ticks_ms()))
        .map_err(|e| anyhow!("Failed to create time.ticks_ms function: {e}"))?;
    table
        .set("ticks_ms", ticks_fn)
        .map_err(|e| anyhow!("Failed to set time.ticks_ms: {e}"))?;

    lua.globals()
        .set("time", table)
        .map_err(|e| anyhow!("Failed to register time table globally: {e}"))?;
    Ok(())
}

/// Level argument: booleans as-is, numbers non-zero means high.
fn level_arg(value: &Value) -> mlua::Result<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Number(n) => Ok(*n != 0.0),
        other => Err(runtime_err(format!(
            "pin level must be a boolean or number, got {}",
            other.type_name()
        ))),
    }
}

fn register_pin(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create pin table: {e}"))?;

    let writer = env.clone();
    let write_fn = lua
        .create_function(move |_, (pin, level): (u8, Value)| {
            writer.pin_write(pin, level_arg(&level)?).map_err(runtime_err)
        })
        .map_err(|e| anyhow!("Failed to create pin.write function: {e}"))?;
    table
        .set("write", write_fn)
        .map_err(|e| anyhow!("Failed to set pin.write: {e}"))?;

    let reader = env.clone();
    let read_fn = lua
        .create_function(move |_, pin: u8| {
            reader.pin_read(pin).map(u8::from).map_err(runtime_err)
        })
        .map_err(|e| anyhow!("Failed to create pin.read function: {e}"))?;
    table
        .set("read", read_fn)
        .map_err(|e| anyhow!("Failed to set pin.read: {e}"))?;

    let toggle_fn = lua
        .create_function(move |_, pin: u8| env.pin_toggle(pin).map(u8::from).map_err(runtime_err))
        .map_err(|e| anyhow!("Failed to create pin.toggle function: {e}"))?;
    table
        .set("toggle", toggle_fn)
        .map_err(|e| anyhow!("Failed to set pin.toggle: {e}"))?;

    lua.globals()
        .set("pin", table)
        .map_err(|e| anyhow!("Failed to register pin table globally: {e}"))?;
    Ok(())
}

fn register_mem(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create mem table: {e}"))?;

    let free_env = env.clone();
    let free_fn = lua
        .create_function(move |_, ()| Ok(free_env.heap_free()))
        .map_err(|e| anyhow!("Failed to create mem.free function: {e}"))?;
    table
        .set("free", free_fn)
        .map_err(|e| anyhow!("Failed to set mem.free: {e}"))?;

    let used_fn = lua
        .create_function(move |_, ()| Ok(env.heap_used()))
        .map_err(|e| anyhow!("Failed to create mem.used function: {e}"))?;
    table
        .set("used", used_fn)
        .map_err(|e| anyhow!("Failed to set mem.used: {e}"))?;

    lua.globals()
        .set("mem", table)
        .map_err(|e| anyhow!("Failed to register mem table globally: {e}"))?;
    Ok(())
}

fn register_fs(lua: &Lua, env: ProgramEnv) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create fs table: {e}"))?;

    let lister = env.clone();
    let list_fn = lua
        .create_function(move |_, ()| {
            let mut names = lister.file_names().map_err(runtime_err)?;
            names.sort();
            Ok(names)
        })
        .map_err(|e| anyhow!("Failed to create fs.list function: {e}"))?;
    table
        .set("list", list_fn)
        .map_err(|e| anyhow!("Failed to set fs.list: {e}"))?;

    let exists_fn = lua
        .create_function(move |_, name: String| Ok(env.file_exists(&name)))
        .map_err(|e| anyhow!("Failed to create fs.exists function: {e}"))?;
    table
        .set("exists", exists_fn)
        .map_err(|e| anyhow!("Failed to set fs.exists: {e}"))?;

    lua.globals()
        .set("fs", table)
        .map_err(|e| anyhow!("Failed to register fs table globally: {e}"))?;
    Ok(())
}
