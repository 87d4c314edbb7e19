//! Record store gateway backed by PostgreSQL/PostGIS.
//!
//! The store is owned by the upstream ingestion pipeline; everything here is
//! read-only. Rows are validated into the typed records of
//! `distribution_common` at this boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;

use distribution_common::{
    Coordinates, DataType, DistributionError, DistributionResult, Element, Product, Record,
};

/// Spatial reference used for published coordinates.
pub const WGS84_SRID: i32 = 4326;

/// Product, element and record lookups needed by a distribution run.
///
/// Element mappings are keyed by element id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Resolve a product by its (variable, type, supplier) identity.
    async fn product_details(
        &self,
        variable: &str,
        kind: &str,
        supplier: &str,
    ) -> DistributionResult<Option<Product>>;

    /// Elements of a product, without geometry.
    async fn elements_without_geometry(
        &self,
        product_id: i64,
    ) -> DistributionResult<BTreeMap<i64, Element>>;

    /// Element point locations of a product, transformed to `srid`.
    async fn element_locations(
        &self,
        product_id: i64,
        srid: i32,
    ) -> DistributionResult<BTreeMap<i64, Coordinates>>;

    /// All records of the simulation identified by `as_of`.
    async fn records(&self, product_id: i64, as_of: i64) -> DistributionResult<Vec<Record>>;

    /// Records dated within `[from, to]`.
    async fn records_by_date(
        &self,
        product_id: i64,
        from: i64,
        to: i64,
    ) -> DistributionResult<Vec<Record>>;
}

/// Database connection pool and record queries.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new store connection from database URL.
    pub async fn connect(database_url: &str) -> DistributionResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| DistributionError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn product_details(
        &self,
        variable: &str,
        kind: &str,
        supplier: &str,
    ) -> DistributionResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id_product, variable, type, supplier, data_type, is_raster, \
             max_age, time_step, update_frequency, unit, \
             last_simulation, last_observation FROM products \
             WHERE variable = $1 AND type = $2 AND supplier = $3 LIMIT 1",
        )
        .bind(variable)
        .bind(kind)
        .bind(supplier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DistributionError::DatabaseError(format!("Query failed: {}", e)))?;

        row.map(Product::try_from).transpose()
    }

    async fn elements_without_geometry(
        &self,
        product_id: i64,
    ) -> DistributionResult<BTreeMap<i64, Element>> {
        let rows = sqlx::query_as::<_, ElementRow>(
            "SELECT e.id_element, e.code, e.name, e.type FROM elements e \
             JOIN product_elements pe ON pe.id_element = e.id_element \
             WHERE pe.id_product = $1 ORDER BY e.id_element",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DistributionError::DatabaseError(format!("Query failed: {}", e)))?;

        debug!(product_id, elements = rows.len(), "Fetched product elements");

        Ok(rows
            .into_iter()
            .map(|r| (r.id_element, Element::from(r)))
            .collect())
    }

    async fn element_locations(
        &self,
        product_id: i64,
        srid: i32,
    ) -> DistributionResult<BTreeMap<i64, Coordinates>> {
        let rows = sqlx::query_as::<_, LocationRow>(
            "SELECT e.id_element, \
             ST_X(ST_Transform(e.geom, $2)) AS x, ST_Y(ST_Transform(e.geom, $2)) AS y \
             FROM elements e \
             JOIN product_elements pe ON pe.id_element = e.id_element \
             WHERE pe.id_product = $1 AND e.geom IS NOT NULL",
        )
        .bind(product_id)
        .bind(srid)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DistributionError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|r| (r.id_element, Coordinates { x: r.x, y: r.y }))
            .collect())
    }

    async fn records(&self, product_id: i64, as_of: i64) -> DistributionResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id_element, date, value FROM records \
             WHERE id_product = $1 AND simulation = $2 \
             ORDER BY id_element, date",
        )
        .bind(product_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DistributionError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn records_by_date(
        &self,
        product_id: i64,
        from: i64,
        to: i64,
    ) -> DistributionResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id_element, date, value FROM records \
             WHERE id_product = $1 AND date >= $2 AND date <= $3 \
             ORDER BY id_element, date",
        )
        .bind(product_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DistributionError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(Record::from).collect())
    }
}

/// Internal row type for product queries.
#[derive(FromRow)]
struct ProductRow {
    id_product: i64,
    variable: String,
    #[sqlx(rename = "type")]
    kind: String,
    supplier: String,
    data_type: String,
    is_raster: bool,
    max_age: i64,
    time_step: i64,
    update_frequency: i64,
    unit: Option<String>,
    last_simulation: Option<i64>,
    last_observation: Option<i64>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DistributionError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let data_type: DataType = row.data_type.parse()?;
        if row.time_step < 0 || row.update_frequency < 0 {
            return Err(DistributionError::InvalidRow(format!(
                "product {} has a negative time step or update frequency",
                row.id_product
            )));
        }

        Ok(Product {
            id: row.id_product,
            variable: row.variable,
            kind: row.kind,
            supplier: row.supplier,
            data_type,
            is_raster: row.is_raster,
            max_age: row.max_age,
            time_step: row.time_step,
            update_frequency: row.update_frequency,
            unit: row.unit.unwrap_or_default(),
            last_simulation: row.last_simulation,
            last_observation: row.last_observation,
        })
    }
}

#[derive(FromRow)]
struct ElementRow {
    id_element: i64,
    code: String,
    name: String,
    #[sqlx(rename = "type")]
    element_type: String,
}

impl From<ElementRow> for Element {
    fn from(row: ElementRow) -> Self {
        Element {
            id: row.id_element,
            code: row.code,
            name: row.name,
            element_type: row.element_type,
            location: None,
        }
    }
}

#[derive(FromRow)]
struct LocationRow {
    id_element: i64,
    x: f64,
    y: f64,
}

#[derive(FromRow)]
struct RecordRow {
    id_element: i64,
    date: i64,
    value: f64,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record::new(row.id_element, row.date, row.value)
    }
}
