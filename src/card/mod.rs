mod eligibility;
mod record;
mod status;

pub use eligibility::{
    EligibilityError, Eligible, birth_date, cgn_eligibility, eyca_eligibility,
};
pub use record::{CardRecord, CardStore, MemoryCardStore};
pub use status::{CardStatus, StatusKind, SubjectId};
