//! Map viewport refresh: load the airports inside the visible box, attach
//! their latest METARs and turn them into colored markers.
//!
//! Every refresh takes a [`Ticket`] carrying a generation number. A result is
//! only applied when no newer ticket has been issued, so a slow response for
//! an old viewport can never replace the markers of a newer one.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::api::airports::MAX_PAGE_SIZE;
use crate::client::{ApiClient, ClientError};
use crate::db::{Airport, AirportCategory, AirportQuery};
use crate::geo::{Bounds, BoundsError, Coordinate};
use crate::weather::{marker_color, FlightCategory, Metar};

#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub bounds: Bounds,
    /// Empty means every category
    pub categories: Vec<AirportCategory>,
}

impl Viewport {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            categories: Vec::new(),
        }
    }

    /// Viewport for the raw corners a map widget reports.
    pub fn from_map_view(
        north_east: Coordinate,
        south_west: Coordinate,
    ) -> Result<Self, BoundsError> {
        Bounds::from_map_view(north_east, south_west).map(Self::new)
    }

    pub fn with_categories(mut self, categories: Vec<AirportCategory>) -> Self {
        self.categories = categories;
        self
    }

    /// The airport search for this viewport.
    pub fn query(&self, embed_metars: bool) -> AirportQuery {
        let categories = (!self.categories.is_empty()).then(|| {
            self.categories
                .iter()
                .map(AirportCategory::as_str)
                .collect::<Vec<_>>()
                .join(",")
        });

        AirportQuery {
            bounds: Some(self.bounds.to_query()),
            categories,
            limit: Some(MAX_PAGE_SIZE),
            metars: embed_metars.then_some(true),
            ..AirportQuery::default()
        }
    }
}

/// Where viewport data comes from.
#[async_trait]
pub trait ViewportLoader: Send + Sync {
    async fn load_airports(
        &self,
        viewport: &Viewport,
        embed_metars: bool,
    ) -> Result<Vec<Airport>, ClientError>;

    async fn load_metars(&self, icaos: &[String]) -> Result<Vec<Metar>, ClientError>;
}

#[async_trait]
impl ViewportLoader for ApiClient {
    async fn load_airports(
        &self,
        viewport: &Viewport,
        embed_metars: bool,
    ) -> Result<Vec<Airport>, ClientError> {
        Ok(self.airports(&viewport.query(embed_metars)).await?.data)
    }

    async fn load_metars(&self, icaos: &[String]) -> Result<Vec<Metar>, ClientError> {
        self.metars(icaos).await
    }
}

/// Attach each METAR to the airport with the matching ICAO code. A later
/// METAR for the same station replaces an earlier one.
pub fn merge_metars(airports: &mut [Airport], metars: Vec<Metar>) {
    let mut by_station: HashMap<String, Metar> = HashMap::with_capacity(metars.len());
    for metar in metars {
        by_station.insert(metar.station_id.clone(), metar);
    }

    for airport in airports.iter_mut() {
        if let Some(metar) = by_station.remove(&airport.icao) {
            airport.latest_metar = Some(metar);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub icao: String,
    pub name: String,
    pub category: AirportCategory,
    pub latitude: f64,
    pub longitude: f64,
    pub flight_category: FlightCategory,
    pub color: &'static str,
}

impl From<&Airport> for Marker {
    fn from(airport: &Airport) -> Self {
        let observed = airport.latest_metar.as_ref().map(|m| m.flight_category);
        Self {
            icao: airport.icao.clone(),
            name: airport.name.clone(),
            category: airport.category,
            latitude: airport.latitude,
            longitude: airport.longitude,
            flight_category: observed.unwrap_or_default(),
            color: marker_color(observed),
        }
    }
}

fn category_rank(category: AirportCategory) -> u8 {
    match category {
        AirportCategory::Heliport => 0,
        AirportCategory::SmallAirport => 1,
        AirportCategory::MediumAirport => 2,
        AirportCategory::LargeAirport => 3,
        _ => 4,
    }
}

/// Draw order: smaller airports first so large ones end up on top, then by
/// flight category with UNKN last.
pub fn sort_markers(markers: &mut [Marker]) {
    markers.sort_by(|a, b| {
        category_rank(a.category)
            .cmp(&category_rank(b.category))
            .then(a.flight_category.rank().cmp(&b.flight_category.rank()))
            .then_with(|| a.icao.cmp(&b.icao))
    });
}

pub fn build_markers(airports: &[Airport]) -> Vec<Marker> {
    let mut markers: Vec<Marker> = airports.iter().map(Marker::from).collect();
    sort_markers(&mut markers);
    markers
}

/// How airports and METARs are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// One airport request with METARs embedded
    #[default]
    Embedded,
    /// Airports first, then a METAR request for the returned stations
    Separate,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    viewport: Viewport,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Markers replaced; holds the new marker count
    Applied(usize),
    /// A newer refresh was started; the result was discarded
    Stale,
}

#[derive(Default)]
struct RefreshState {
    generation: u64,
    viewport: Option<Viewport>,
    markers: Vec<Marker>,
}

pub struct ViewportRefresher<L> {
    loader: L,
    strategy: LoadStrategy,
    state: Mutex<RefreshState>,
}

impl<L: ViewportLoader> ViewportRefresher<L> {
    pub fn new(loader: L, strategy: LoadStrategy) -> Self {
        Self {
            loader,
            strategy,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Start a refresh, superseding any refresh still in flight.
    pub fn begin(&self, viewport: Viewport) -> Ticket {
        let mut state = self.state.lock();
        state.generation += 1;
        Ticket {
            generation: state.generation,
            viewport,
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.state.lock().generation == ticket.generation
    }

    /// Apply a finished load if `ticket` is still the newest.
    ///
    /// Errors for the newest ticket are returned and leave the current
    /// markers in place.
    pub fn complete(
        &self,
        ticket: Ticket,
        result: Result<Vec<Airport>, ClientError>,
    ) -> Result<RefreshOutcome, ClientError> {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            tracing::debug!(
                generation = ticket.generation,
                current = state.generation,
                "Discarding superseded viewport result"
            );
            return Ok(RefreshOutcome::Stale);
        }

        let airports = result?;
        state.markers = build_markers(&airports);
        state.viewport = Some(ticket.viewport);
        Ok(RefreshOutcome::Applied(state.markers.len()))
    }

    async fn load(&self, viewport: &Viewport) -> Result<Vec<Airport>, ClientError> {
        match self.strategy {
            LoadStrategy::Embedded => self.loader.load_airports(viewport, true).await,
            LoadStrategy::Separate => {
                let mut airports = self.loader.load_airports(viewport, false).await?;
                let icaos: Vec<String> = airports.iter().map(|a| a.icao.clone()).collect();
                let metars = self.loader.load_metars(&icaos).await?;
                merge_metars(&mut airports, metars);
                Ok(airports)
            }
        }
    }

    /// Begin, load and complete in one go.
    pub async fn refresh(&self, viewport: Viewport) -> Result<RefreshOutcome, ClientError> {
        let ticket = self.begin(viewport);
        let result = self.load(ticket.viewport()).await;
        if let Err(e) = &result {
            tracing::warn!(generation = ticket.generation, error = %e, "Viewport load failed");
        }
        self.complete(ticket, result)
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.state.lock().markers.clone()
    }

    /// Viewport the current markers were loaded for.
    pub fn viewport(&self) -> Option<Viewport> {
        self.state.lock().viewport.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
