pub mod guild;
pub mod member;

pub use guild::{handle_guild_create, handle_guild_delete, handle_role_delete};
pub use member::{handle_member_removal, handle_member_update};
