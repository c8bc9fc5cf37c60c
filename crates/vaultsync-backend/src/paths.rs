//! Identity backend request paths

pub const GROUP_READ: &str = "/identity/group/name";
pub const GROUP_DELETE: &str = "/identity/group/name/delete";
pub const GROUP_UPDATE: &str = "/identity/group/name/update";
pub const GROUP_ALIAS_CREATE: &str = "/identity/group-alias";
pub const GROUP_ALIAS_DELETE: &str = "/identity/group-alias/id/delete";
pub const ENTITY_LOOKUP: &str = "/identity/lookup/entity";
pub const ENTITY_ALIAS_CREATE: &str = "/identity/entity-alias";
pub const ENTITY_UPDATE: &str = "/identity/entity/name/update";
pub const MOUNT_LIST: &str = "/sys/list";
pub const READ: &str = "/read";
pub const WRITE: &str = "/write";
