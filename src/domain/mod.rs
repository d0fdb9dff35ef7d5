mod attributes;
mod price;
mod subscriber_email;
mod subscription;
mod subscription_name;

pub use attributes::*;
pub use price::Price;
pub use subscriber_email::SubscriberEmail;
pub use subscription::*;
pub use subscription_name::SubscriptionName;
