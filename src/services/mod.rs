pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payments;
pub mod quota;

pub use cart::CartService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use quota::QuotaService;
