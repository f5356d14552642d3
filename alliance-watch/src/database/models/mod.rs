//! Database models.

mod alliance;
mod change;
mod member;

pub use alliance::{AllianceDbModel, AllianceScheduleDbModel};
pub use change::{ChangeField, ChangeRecordDbModel, NewChangeRecord};
pub use member::MemberDbModel;
