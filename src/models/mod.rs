pub mod user;
pub mod showing;
pub mod cart;
pub mod payment;
pub mod reservation;

pub use user::User;
pub use showing::{SeatInfo, ShowingDetails};
pub use cart::{Cart, CartDisplay, CartSeat};
pub use payment::{Payment, PaymentStatus};
pub use reservation::Reservation;
