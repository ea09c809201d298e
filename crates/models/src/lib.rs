mod internships;
mod notifications;
mod users;

pub use internships::{Application, ApplicationStatus, ApplicationSummary, Internship};
pub use notifications::{
    DueSms, JobStatus, JobType, Notification, NotificationKind, PushSubscription, ScheduledJob,
};
pub use users::{Role, User, UserRecord};

pub use chrono::{DateTime, NaiveDate, Utc};
pub use uuid::Uuid;
