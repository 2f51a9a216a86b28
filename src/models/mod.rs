pub mod call_history;
pub mod campaign;
pub mod contact;
pub mod user_settings;

pub use call_history::*;
pub use campaign::*;
pub use contact::*;
pub use user_settings::*;
