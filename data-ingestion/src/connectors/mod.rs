pub mod fixture;

pub use fixture::{Endpoint, FixtureSource, TickerFixture};
