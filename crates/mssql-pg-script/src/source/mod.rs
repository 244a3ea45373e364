//! MSSQL source database operations: catalog introspection and row
//! streaming.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::NaiveDateTime;
use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{Catalog, Column, ForeignKey, Index, Schema, Table};
use crate::config::SourceConfig;
use crate::error::{Result, ScriptError};
use crate::value::{Batch, SqlValue};

/// Rows per batch sent through the streaming channel.
const BATCH_SIZE: usize = 5_000;

/// Batches buffered between the reader task and the writer.
const CHANNEL_DEPTH: usize = 16;

/// Streams rows out of source tables.
///
/// Returns a channel receiver so the reader runs ahead of the writer by at
/// most the channel depth. The first error ends the stream.
pub trait RowSource: Send + Sync {
    fn read_table(&self, table: &Table, limit: Option<u64>) -> mpsc::Receiver<Result<Batch>>;
}

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.config.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// MSSQL source with connection pooling.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    config: SourceConfig,
}

impl MssqlPool {
    /// Connect with the default pool size.
    pub async fn new(config: SourceConfig) -> Result<Self> {
        Self::with_max_connections(config, 4).await
    }

    /// Connect with a specific pool size, verifying with a probe query.
    pub async fn with_max_connections(config: SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| ScriptError::pool(e.to_string(), "creating MSSQL pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| ScriptError::pool(e.to_string(), "probing MSSQL pool"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self { pool, config })
    }

    async fn get_client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| ScriptError::pool(e.to_string(), "getting connection"))
    }

    /// Read the full catalog: schemas, tables, columns, keys and indexes.
    ///
    /// Schemas in `exclude` are not introspected at all. Every query is
    /// ordered, so two runs against an unchanged database produce the same
    /// catalog.
    pub async fn read_catalog(&self, exclude: &BTreeSet<String>) -> Result<Catalog> {
        let mut client = self.get_client().await?;

        let schema_names = self.load_schema_names(&mut client).await?;
        let mut schemas = Vec::new();
        for name in schema_names {
            if exclude.contains(&name) {
                debug!("Skipping excluded schema {}", name);
                continue;
            }
            let tables = self.load_tables(&mut client, &name).await?;
            schemas.push(Schema { name, tables });
        }

        let catalog = Catalog {
            database: self.config.database.clone(),
            schemas,
        };
        info!(
            "Read catalog for {}: {} schemas, {} tables",
            catalog.database,
            catalog.schemas.len(),
            catalog.table_count()
        );
        Ok(catalog)
    }

    async fn load_schema_names(
        &self,
        client: &mut Client<Compat<TcpStream>>,
    ) -> Result<Vec<String>> {
        let query = r#"
            SELECT SCHEMA_NAME
            FROM INFORMATION_SCHEMA.SCHEMATA s
            WHERE EXISTS (SELECT 1
                          FROM INFORMATION_SCHEMA.TABLES
                          WHERE TABLE_SCHEMA = s.SCHEMA_NAME
                            AND TABLE_TYPE = 'BASE TABLE')
            ORDER BY SCHEMA_NAME
        "#;

        let stream = client.simple_query(query).await?;
        let rows = stream.into_first_result().await?;

        Ok(rows
            .iter()
            .filter_map(|r| r.get::<&str, _>(0))
            .map(String::from)
            .collect())
    }

    async fn load_tables(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        schema: &str,
    ) -> Result<Vec<Table>> {
        let query = r#"
            SELECT t.TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES t
            WHERE t.TABLE_TYPE = 'BASE TABLE'
              AND t.TABLE_SCHEMA = @P1
            ORDER BY t.TABLE_NAME
        "#;

        let mut q = Query::new(query);
        q.bind(schema);

        let stream = q.query(client).await?;
        let rows = stream.into_first_result().await?;

        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get::<&str, _>(0))
            .map(String::from)
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut table = Table {
                schema: schema.to_string(),
                name,
                columns: Vec::new(),
                primary_key: Vec::new(),
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
            };

            self.load_columns(client, &mut table).await?;
            self.load_primary_key(client, &mut table).await?;
            self.load_indexes(client, &mut table).await?;
            self.load_foreign_keys(client, &mut table).await?;

            tables.push(table);
        }

        info!("Read {} tables from schema '{}'", tables.len(), schema);
        Ok(tables)
    }

    async fn load_columns(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        table: &mut Table,
    ) -> Result<()> {
        let query = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
                CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT),
                CAST(ISNULL(NUMERIC_SCALE, 0) AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                ISNULL(COLUMNPROPERTY(OBJECT_ID(TABLE_SCHEMA + '.' + TABLE_NAME), COLUMN_NAME, 'IsIdentity'), 0),
                COLUMN_DEFAULT,
                ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let mut query = Query::new(query);
        query.bind(&table.schema);
        query.bind(&table.name);

        let stream = query.query(client).await?;
        let rows = stream.into_first_result().await?;

        for row in rows {
            let col = Column {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                data_type: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                max_length: row.get::<i32, _>(2).unwrap_or(0),
                precision: row.get::<i32, _>(3).unwrap_or(0),
                scale: row.get::<i32, _>(4).unwrap_or(0),
                is_nullable: row.get::<i32, _>(5).unwrap_or(0) == 1,
                is_identity: row.get::<i32, _>(6).unwrap_or(0) == 1,
                default: row.get::<&str, _>(7).map(String::from),
                ordinal_pos: row.get::<i32, _>(8).unwrap_or(0),
            };
            table.columns.push(col);
        }

        if table.columns.is_empty() {
            return Err(ScriptError::Catalog(format!(
                "table {} has no columns",
                table.full_name()
            )));
        }

        debug!(
            "Loaded {} columns for {}",
            table.columns.len(),
            table.full_name()
        );
        Ok(())
    }

    async fn load_primary_key(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        table: &mut Table,
    ) -> Result<()> {
        let query = r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#;

        let mut query = Query::new(query);
        query.bind(&table.schema);
        query.bind(&table.name);

        let stream = query.query(client).await?;
        let rows = stream.into_first_result().await?;

        for row in rows {
            let col_name: &str = row.get(0).unwrap_or_default();
            table.primary_key.push(col_name.to_string());
        }

        debug!(
            "Primary key for {}: {:?}",
            table.full_name(),
            table.primary_key
        );
        Ok(())
    }

    async fn load_indexes(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        table: &mut Table,
    ) -> Result<()> {
        // STUFF/FOR XML PATH gives ordered string aggregation on older
        // SQL Server versions that lack STRING_AGG
        let query = r#"
            SELECT
                i.name AS index_name,
                i.is_unique,
                STUFF((
                    SELECT ',' + c2.name
                    FROM sys.index_columns ic2
                    JOIN sys.columns c2 ON ic2.object_id = c2.object_id AND ic2.column_id = c2.column_id
                    WHERE ic2.object_id = i.object_id AND ic2.index_id = i.index_id AND ic2.is_included_column = 0
                    ORDER BY ic2.key_ordinal
                    FOR XML PATH('')
                ), 1, 1, '') AS columns
            FROM sys.indexes i
            JOIN sys.tables tb ON i.object_id = tb.object_id
            JOIN sys.schemas s ON tb.schema_id = s.schema_id
            WHERE s.name = @P1
              AND tb.name = @P2
              AND i.is_primary_key = 0
              AND i.type > 0
            ORDER BY i.name
        "#;

        let mut q = Query::new(query);
        q.bind(&table.schema);
        q.bind(&table.name);

        let stream = q.query(client).await?;
        let rows = stream.into_first_result().await?;

        for row in rows {
            let cols_str: &str = row.get(2).unwrap_or_default();
            let index = Index {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                is_unique: row.get::<bool, _>(1).unwrap_or(false),
                columns: cols_str
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            };
            table.indexes.push(index);
        }

        debug!(
            "Loaded {} indexes for {}",
            table.indexes.len(),
            table.full_name()
        );
        Ok(())
    }

    async fn load_foreign_keys(
        &self,
        client: &mut Client<Compat<TcpStream>>,
        table: &mut Table,
    ) -> Result<()> {
        let query = r#"
            SELECT
                fk.name AS fk_name,
                STUFF((
                    SELECT ',' + pc2.name
                    FROM sys.foreign_key_columns fkc2
                    JOIN sys.columns pc2 ON fkc2.parent_object_id = pc2.object_id AND fkc2.parent_column_id = pc2.column_id
                    WHERE fkc2.constraint_object_id = fk.object_id
                    ORDER BY fkc2.constraint_column_id
                    FOR XML PATH('')
                ), 1, 1, '') AS parent_columns,
                rs.name AS ref_schema,
                rt.name AS ref_table,
                STUFF((
                    SELECT ',' + rc2.name
                    FROM sys.foreign_key_columns fkc2
                    JOIN sys.columns rc2 ON fkc2.referenced_object_id = rc2.object_id AND fkc2.referenced_column_id = rc2.column_id
                    WHERE fkc2.constraint_object_id = fk.object_id
                    ORDER BY fkc2.constraint_column_id
                    FOR XML PATH('')
                ), 1, 1, '') AS ref_columns
            FROM sys.foreign_keys fk
            JOIN sys.tables pt ON fk.parent_object_id = pt.object_id
            JOIN sys.schemas ps ON pt.schema_id = ps.schema_id
            JOIN sys.tables rt ON fk.referenced_object_id = rt.object_id
            JOIN sys.schemas rs ON rt.schema_id = rs.schema_id
            WHERE ps.name = @P1 AND pt.name = @P2
            ORDER BY fk.name
        "#;

        let mut q = Query::new(query);
        q.bind(&table.schema);
        q.bind(&table.name);

        let stream = q.query(client).await?;
        let rows = stream.into_first_result().await?;

        for row in rows {
            let cols_str: &str = row.get(1).unwrap_or_default();
            let ref_cols_str: &str = row.get(4).unwrap_or_default();

            let fk = ForeignKey {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                columns: cols_str
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                ref_schema: row.get::<&str, _>(2).unwrap_or_default().to_string(),
                ref_table: row.get::<&str, _>(3).unwrap_or_default().to_string(),
                ref_columns: ref_cols_str
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            };
            table.foreign_keys.push(fk);
        }

        debug!(
            "Loaded {} foreign keys for {}",
            table.foreign_keys.len(),
            table.full_name()
        );
        Ok(())
    }
}

impl RowSource for MssqlPool {
    fn read_table(&self, table: &Table, limit: Option<u64>) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let pool = self.pool.clone();
        let table_name = table.full_name();
        let sql = build_select(table, limit);
        let data_types: Vec<String> = table.columns.iter().map(|c| c.data_type.clone()).collect();

        tokio::spawn(async move {
            if let Err(e) = stream_rows(pool, sql, data_types, table_name, tx.clone()).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        rx
    }
}

fn build_select(table: &Table, limit: Option<u64>) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| quote_mssql(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let top = match limit {
        Some(n) => format!("TOP {} ", n),
        None => String::new(),
    };

    format!(
        "SELECT {}{} FROM {}.{}",
        top,
        cols,
        quote_mssql(&table.schema),
        quote_mssql(&table.name)
    )
}

fn quote_mssql(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

async fn stream_rows(
    pool: Pool<TiberiusConnectionManager>,
    sql: String,
    data_types: Vec<String>,
    table_name: String,
    tx: mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| ScriptError::pool(e.to_string(), "getting connection for row stream"))?;

    let mut stream = client
        .simple_query(&sql)
        .await
        .map_err(|e| ScriptError::row_read(&table_name, e.to_string()))?;

    let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(BATCH_SIZE);
    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| ScriptError::row_read(&table_name, e.to_string()))?
    {
        let row = match item {
            QueryItem::Row(row) => row,
            QueryItem::Metadata(_) => continue,
        };

        let mut values = Vec::with_capacity(data_types.len());
        for (idx, data_type) in data_types.iter().enumerate() {
            values.push(convert_row_value(&row, idx, data_type));
        }
        rows.push(values);

        if rows.len() >= BATCH_SIZE {
            let batch = Batch::new(std::mem::replace(
                &mut rows,
                Vec::with_capacity(BATCH_SIZE),
            ));
            if tx.send(Ok(batch)).await.is_err() {
                // Receiver gone, the writer stopped early
                return Ok(());
            }
        }
    }

    let _ = tx.send(Ok(Batch::new(rows).mark_final())).await;
    Ok(())
}

/// Convert a row value to SqlValue based on the declared column type.
fn convert_row_value(row: &Row, idx: usize, data_type: &str) -> SqlValue {
    let dt = data_type.to_lowercase();

    match dt.as_str() {
        "bit" => row
            .get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "tinyint" => row
            .get::<u8, _>(idx)
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null),
        "smallint" => row
            .get::<i16, _>(idx)
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null),
        "int" => row
            .get::<i32, _>(idx)
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null),
        "bigint" => row
            .get::<i64, _>(idx)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null),
        "real" => row
            .get::<f32, _>(idx)
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null),
        "float" => row
            .get::<f64, _>(idx)
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null),
        "uniqueidentifier" => row
            .get::<Uuid, _>(idx)
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null),
        "datetime" | "datetime2" | "smalldatetime" => row
            .get::<NaiveDateTime, _>(idx)
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        "datetimeoffset" => row
            .get::<chrono::DateTime<chrono::FixedOffset>, _>(idx)
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null),
        "date" => {
            // Tiberius surfaces date as NaiveDateTime
            row.get::<NaiveDateTime, _>(idx)
                .map(|dt| SqlValue::Date(dt.date()))
                .unwrap_or(SqlValue::Null)
        }
        "time" => row
            .get::<NaiveDateTime, _>(idx)
            .map(|dt| SqlValue::Time(dt.time()))
            .unwrap_or(SqlValue::Null),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .get::<&[u8], _>(idx)
            .map(|v| SqlValue::Bytes(v.to_vec()))
            .unwrap_or(SqlValue::Null),
        "decimal" | "numeric" | "money" | "smallmoney" => row
            .get::<&str, _>(idx)
            .and_then(|s| s.parse::<rust_decimal::Decimal>().ok())
            .map(SqlValue::Decimal)
            .or_else(|| {
                row.get::<f64, _>(idx).map(|f| {
                    rust_decimal::Decimal::try_from(f)
                        .map(SqlValue::Decimal)
                        .unwrap_or(SqlValue::F64(f))
                })
            })
            .unwrap_or(SqlValue::Null),
        _ => {
            // Covers varchar, nvarchar, char, nchar, text, ntext, xml
            row.get::<&str, _>(idx)
                .map(|s| SqlValue::Text(s.to_string()))
                .unwrap_or(SqlValue::Null)
        }
    }
}
