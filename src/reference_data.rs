use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::flight_metadata::FlightMetadata;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportRecord {
    pub iata: String,
    pub name: String,
    #[serde(default)]
    pub icao: Option<String>,
    /// IATA code of the served city
    #[serde(default)]
    pub city_iata: Option<String>,
    #[serde(default)]
    pub country_iso2: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirlineRecord {
    pub iata: String,
    pub name: String,
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub country_iso2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftRecord {
    pub icao: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub iata: String,
    pub name: String,
    #[serde(default)]
    pub country_iso2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub iso2: String,
    pub name: String,
}

/// Read-only keyed lookups over static reference data
pub trait ReferenceCatalog: Send + Sync {
    fn airport(&self, iata: &str) -> Option<&AirportRecord>;
    fn airline(&self, iata: &str) -> Option<&AirlineRecord>;
    fn aircraft(&self, icao: &str) -> Option<&AircraftRecord>;
    fn city(&self, iata: &str) -> Option<&CityRecord>;
    fn country(&self, iso2: &str) -> Option<&CountryRecord>;
}

/// File layout for [`StaticCatalog::load`]
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    airports: Vec<AirportRecord>,
    #[serde(default)]
    airlines: Vec<AirlineRecord>,
    #[serde(default)]
    aircraft: Vec<AircraftRecord>,
    #[serde(default)]
    cities: Vec<CityRecord>,
    #[serde(default)]
    countries: Vec<CountryRecord>,
}

/// In-memory catalog keyed by uppercase code
#[derive(Debug, Default)]
pub struct StaticCatalog {
    airports: HashMap<String, AirportRecord>,
    airlines: HashMap<String, AirlineRecord>,
    aircraft: HashMap<String, AircraftRecord>,
    cities: HashMap<String, CityRecord>,
    countries: HashMap<String, CountryRecord>,
}

fn index_by<T>(records: Vec<T>, key: impl Fn(&T) -> &str) -> HashMap<String, T> {
    records
        .into_iter()
        .map(|r| (key(&r).trim().to_uppercase(), r))
        .collect()
}

impl StaticCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference data {:?}", path))?;
        Self::from_json(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self {
            airports: index_by(file.airports, |r| &r.iata),
            airlines: index_by(file.airlines, |r| &r.iata),
            aircraft: index_by(file.aircraft, |r| &r.icao),
            cities: index_by(file.cities, |r| &r.iata),
            countries: index_by(file.countries, |r| &r.iso2),
        })
    }

    pub fn len(&self) -> usize {
        self.airports.len()
            + self.airlines.len()
            + self.aircraft.len()
            + self.cities.len()
            + self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReferenceCatalog for StaticCatalog {
    fn airport(&self, iata: &str) -> Option<&AirportRecord> {
        self.airports.get(&iata.to_uppercase())
    }

    fn airline(&self, iata: &str) -> Option<&AirlineRecord> {
        self.airlines.get(&iata.to_uppercase())
    }

    fn aircraft(&self, icao: &str) -> Option<&AircraftRecord> {
        self.aircraft.get(&icao.to_uppercase())
    }

    fn city(&self, iata: &str) -> Option<&CityRecord> {
        self.cities.get(&iata.to_uppercase())
    }

    fn country(&self, iso2: &str) -> Option<&CountryRecord> {
        self.countries.get(&iso2.to_uppercase())
    }
}

/// Human-readable end of a route
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteEndpoint {
    pub iata: String,
    pub airport: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// Names resolved from a metadata row; unknown codes stay `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteDetails {
    pub departure: Option<RouteEndpoint>,
    pub arrival: Option<RouteEndpoint>,
    pub airline: Option<String>,
    pub aircraft: Option<String>,
    pub registration_country: Option<String>,
}

fn endpoint(catalog: &dyn ReferenceCatalog, iata: Option<&str>) -> Option<RouteEndpoint> {
    let iata = iata?;
    let airport = catalog.airport(iata);
    let city_code = airport
        .and_then(|a| a.city_iata.as_deref())
        .unwrap_or(iata);
    let city = catalog.city(city_code);
    let country = airport
        .and_then(|a| a.country_iso2.as_deref())
        .or_else(|| city.and_then(|c| c.country_iso2.as_deref()))
        .and_then(|iso2| catalog.country(iso2));

    Some(RouteEndpoint {
        iata: iata.to_string(),
        airport: airport.map(|a| a.name.clone()),
        city: city.map(|c| c.name.clone()),
        country: country.map(|c| c.name.clone()),
    })
}

impl RouteDetails {
    pub fn resolve(catalog: &dyn ReferenceCatalog, metadata: &FlightMetadata) -> Self {
        Self {
            departure: endpoint(catalog, metadata.dep_iata.as_deref()),
            arrival: endpoint(catalog, metadata.arr_iata.as_deref()),
            airline: metadata
                .airline_iata
                .as_deref()
                .and_then(|code| catalog.airline(code))
                .map(|a| a.name.clone()),
            aircraft: metadata
                .aircraft_icao
                .as_deref()
                .and_then(|code| catalog.aircraft(code))
                .map(|a| a.name.clone()),
            registration_country: metadata
                .aircraft_flag
                .as_deref()
                .and_then(|code| catalog.country(code))
                .map(|c| c.name.clone()),
        }
    }
}
