use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SeatInfo, ShowingDetails};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartSeat {
    pub seat_id: i64,
    pub row: i32,
    pub column: i32,
    pub seat_type: String,
    pub extra_price: Decimal,
}

impl From<SeatInfo> for CartSeat {
    fn from(seat: SeatInfo) -> Self {
        Self {
            seat_id: seat.id,
            row: seat.row,
            column: seat.column,
            seat_type: seat.seat_type,
            extra_price: seat.extra_price,
        }
    }
}

/// What the checkout page shows without going back to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartDisplay {
    pub movie_title: String,
    pub theater_name: String,
    pub hall_name: String,
    pub starts_at: DateTime<Utc>,
}

/// Snapshot of the seats a session currently holds for one showing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cart {
    pub id: Uuid,
    pub showing_id: i64,
    pub owner_session_id: String,
    pub seats: Vec<CartSeat>,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub display: CartDisplay,
    pub created_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(owner_session_id: &str, showing: ShowingDetails, seats: Vec<SeatInfo>) -> Self {
        let seats: Vec<CartSeat> = seats.into_iter().map(CartSeat::from).collect();
        let total_price = Self::total_for(showing.base_price, &seats);

        Self {
            id: Uuid::new_v4(),
            showing_id: showing.id,
            owner_session_id: owner_session_id.to_string(),
            seats,
            base_price: showing.base_price,
            total_price,
            display: CartDisplay {
                movie_title: showing.movie_title,
                theater_name: showing.theater_name,
                hall_name: showing.hall_name,
                starts_at: showing.starts_at,
            },
            created_at: Utc::now(),
        }
    }

    /// base price per seat plus each seat's surcharge
    pub fn total_for(base_price: Decimal, seats: &[CartSeat]) -> Decimal {
        seats
            .iter()
            .map(|seat| base_price + seat.extra_price)
            .sum()
    }

    pub fn seat_ids(&self) -> Vec<i64> {
        self.seats.iter().map(|s| s.seat_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn seat(id: i64, extra: Decimal) -> CartSeat {
        CartSeat {
            seat_id: id,
            row: 1,
            column: id as i32,
            seat_type: "standard".into(),
            extra_price: extra,
        }
    }

    #[test]
    fn total_is_base_times_count_plus_surcharges() {
        let seats = vec![seat(1, dec!(0)), seat(2, dec!(15)), seat(3, dec!(10))];
        assert_eq!(Cart::total_for(dec!(50), &seats), dec!(175));
    }

    #[test]
    fn fractional_prices_do_not_drift() {
        let seats: Vec<CartSeat> = (1..=10).map(|i| seat(i, dec!(0.1))).collect();
        assert_eq!(Cart::total_for(dec!(0.2), &seats), dec!(3.0));
    }

    proptest! {
        #[test]
        fn total_matches_closed_form(base in 0i64..100_000, extras in prop::collection::vec(0i64..10_000, 0..12)) {
            let base = Decimal::new(base, 2);
            let seats: Vec<CartSeat> = extras
                .iter()
                .enumerate()
                .map(|(i, e)| seat(i as i64, Decimal::new(*e, 2)))
                .collect();
            let expected = base * Decimal::from(seats.len()) + seats.iter().map(|s| s.extra_price).sum::<Decimal>();
            prop_assert_eq!(Cart::total_for(base, &seats), expected);
        }
    }
}
