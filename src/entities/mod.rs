pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod plan;
pub mod product;
pub mod seller;
pub mod subscription;
pub mod user;

pub use cart_item::Entity as CartItem;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use plan::Entity as Plan;
pub use product::Entity as Product;
pub use seller::Entity as Seller;
pub use subscription::Entity as Subscription;
pub use user::Entity as User;
