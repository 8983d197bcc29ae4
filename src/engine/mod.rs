pub mod dispatch;
pub mod locator;
