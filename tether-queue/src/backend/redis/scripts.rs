use ::redis::Script;

const PUSH_LUA: &str = include_str!("lua/push.lua");
const POP_LUA: &str = include_str!("lua/pop.lua");
const RELEASE_LUA: &str = include_str!("lua/release.lua");
const MIGRATE_LUA: &str = include_str!("lua/migrate.lua");
const SIZE_LUA: &str = include_str!("lua/size.lua");
const CLEAR_LUA: &str = include_str!("lua/clear.lua");

/// Lua scripts keeping the ready list, the sorted sets and the notify list
/// consistent with each other
pub(crate) struct LuaScripts {
    pub push: Script,
    pub pop: Script,
    pub release: Script,
    pub migrate: Script,
    pub size: Script,
    pub clear: Script,
}

impl LuaScripts {
    pub fn new() -> Self {
        Self {
            push: Script::new(PUSH_LUA),
            pop: Script::new(POP_LUA),
            release: Script::new(RELEASE_LUA),
            migrate: Script::new(MIGRATE_LUA),
            size: Script::new(SIZE_LUA),
            clear: Script::new(CLEAR_LUA),
        }
    }
}
