use crate::error::{FleetError, Result};
use rand::seq::SliceRandom;
use rand::Rng;

pub const REROUTE_TOO_SHORT: &str = "Route too short to reroute";

/// An ordered, non-empty list of stop names and the vehicle's position in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    stops: Vec<String>,
    current: usize,
}

impl Route {
    pub fn new(stops: Vec<String>) -> Result<Self> {
        if stops.is_empty() {
            return Err(FleetError::InvalidRoute("a route needs at least one stop".into()));
        }
        Ok(Self { stops, current: 0 })
    }

    pub fn stops(&self) -> &[String] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_stop(&self) -> &str {
        &self.stops[self.current]
    }

    pub fn next_index(&self) -> usize {
        (self.current + 1) % self.stops.len()
    }

    pub fn next_stop(&self) -> &str {
        &self.stops[self.next_index()]
    }

    /// Moves to the next stop, wrapping to the start. Returns the stop arrived at.
    pub fn advance(&mut self) -> &str {
        self.current = self.next_index();
        &self.stops[self.current]
    }

    /// Moves the cursor to `stop`, searching forward from the current
    /// position. A leg keeps its destination even if the route was
    /// reshuffled while travelling; a stop no longer on the route falls
    /// back to `advance`.
    pub fn arrive_at(&mut self, stop: &str) -> &str {
        let len = self.stops.len();
        let found = (1..=len)
            .map(|k| (self.current + k) % len)
            .find(|&i| self.stops[i] == stop);
        match found {
            Some(i) => {
                self.current = i;
                &self.stops[i]
            }
            None => self.advance(),
        }
    }

    /// Shuffles the interior stops, keeping the first and last in place.
    /// Routes of three stops or fewer are left untouched and rejected.
    pub fn reroute<R: Rng + ?Sized>(&mut self, rng: &mut R) -> std::result::Result<(), String> {
        let len = self.stops.len();
        if len <= 3 {
            return Err(REROUTE_TOO_SHORT.to_string());
        }
        self.stops[1..len - 1].shuffle(rng);
        Ok(())
    }
}
