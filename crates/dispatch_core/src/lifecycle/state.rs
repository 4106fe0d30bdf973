use std::fmt;

use serde::{Deserialize, Serialize};

/// States of one trip lifecycle, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    /// Suspended until a match cycle pairs the passenger with a driver
    WaitingForMatch,
    /// The ride action is running
    InTrip,
    /// Collecting the driver's score for the passenger
    AwaitingDriverRating,
    /// Driver released; suspended until payment is confirmed
    AwaitingPayment,
    /// Collecting the passenger's score for the driver
    AwaitingPassengerRating,
    Completed,
}

impl TripState {
    /// No further transitions and no further signals.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The state that follows this one, or `None` for the terminal state.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::WaitingForMatch => Some(Self::InTrip),
            Self::InTrip => Some(Self::AwaitingDriverRating),
            Self::AwaitingDriverRating => Some(Self::AwaitingPayment),
            Self::AwaitingPayment => Some(Self::AwaitingPassengerRating),
            Self::AwaitingPassengerRating => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForMatch => write!(f, "waiting_for_match"),
            Self::InTrip => write!(f, "in_trip"),
            Self::AwaitingDriverRating => write!(f, "awaiting_driver_rating"),
            Self::AwaitingPayment => write!(f, "awaiting_payment"),
            Self::AwaitingPassengerRating => write!(f, "awaiting_passenger_rating"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TripState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_for_match" => Ok(Self::WaitingForMatch),
            "in_trip" => Ok(Self::InTrip),
            "awaiting_driver_rating" => Ok(Self::AwaitingDriverRating),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "awaiting_passenger_rating" => Ok(Self::AwaitingPassengerRating),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid trip state: {s}")),
        }
    }
}
