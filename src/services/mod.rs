// Settlement coordinator
pub mod orders;
pub mod settlement;

// Collaborators
pub mod documents;
pub mod gateway;
pub mod invoice;
pub mod notifications;
pub mod transaction_id;
