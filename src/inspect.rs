// ABOUTME: Resolves a source table's shape through the schema cache
// ABOUTME: First sight introspects and records; later runs read the pinned shape

use crate::cache::SchemaCache;
use crate::config::DbConfig;
use crate::error::{PoaError, Result};
use crate::filters::After;
use crate::model::Table;
use crate::source;

/// Resolve the shape of a source table, pinning it in the cache database
/// on first sight.
///
/// When a cached shape exists, its primary key must match the caller's
/// `pk` argument exactly, order included; a disagreement means the caller
/// and the cache have diverged and the operation refuses to proceed.
pub async fn inspect(
    src_db_config: &DbConfig,
    src_schema_name: Option<&str>,
    src_table_name: &str,
    cache_db_config: &DbConfig,
    pk: &[String],
) -> Result<Table> {
    if pk.is_empty() {
        return Err(PoaError::Config("pk is required.".into()));
    }

    let mut cache = SchemaCache::connect(cache_db_config).await?;

    let cached = cache
        .get_table_def(src_db_config.db_name(), src_schema_name, src_table_name)
        .await?;

    if let Some(cached_table) = cached {
        let requested: Vec<String> = pk.iter().map(|c| c.to_lowercase()).collect();
        if cached_table.pk != requested {
            return Err(PoaError::pk_mismatch(&cached_table.pk, &requested));
        }
        return Ok(cached_table);
    }

    let mut src = source::create(
        src_db_config,
        src_schema_name,
        src_table_name,
        pk,
        &After::new(),
    )
    .await?;

    let src_table = src.get_table().await?;
    cache.add_table(&src_table).await?;
    Ok(src_table)
}
