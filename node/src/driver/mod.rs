mod actor;
mod ingress;

pub use actor::{Actor, Config, Summary};
pub use ingress::{Mailbox, MailboxError, Message};
