pub mod callback;
pub mod health;
pub mod promote;
