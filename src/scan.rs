/*!
 * Single-pass scan over primary patient records
 *
 * Used where no derived index exists for a population (e.g. "has been
 * pregnant"). Only the key list is materialized; records are fetched and
 * parsed one at a time as the iterator advances.
 */

use std::vec::IntoIter;

use tracing::trace;

use crate::data_types::PatientRecord;
use crate::schema::KeySchema;
use crate::store::Store;
use crate::Result;

/// Progress information for long scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub scanned: usize,
    pub total: usize,
}

/// Lazy producer of typed patient records
pub struct PatientScan<'a, S: Store + ?Sized> {
    store: &'a S,
    schema: &'a KeySchema,
    keys: IntoIter<String>,
    total: usize,
    scanned: usize,
    progress_callback: Option<Box<dyn Fn(ScanProgress) + Send + Sync + 'a>>,
}

impl<'a, S: Store + ?Sized> PatientScan<'a, S> {
    /// Enumerate primary record keys; no record is read yet
    pub fn start(store: &'a S, schema: &'a KeySchema) -> Result<Self> {
        let keys = store.keys_by_prefix(&schema.patient_prefix)?;
        let total = keys.len();
        Ok(Self {
            store,
            schema,
            keys: keys.into_iter(),
            total,
            scanned: 0,
            progress_callback: None,
        })
    }

    /// Report progress every 1000 records and at the end
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ScanProgress) + Send + Sync + 'a,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Number of primary record keys found
    pub fn total(&self) -> usize {
        self.total
    }

    fn report(&self) {
        if let Some(ref callback) = self.progress_callback {
            if self.scanned % 1000 == 0 || self.scanned == self.total {
                callback(ScanProgress {
                    scanned: self.scanned,
                    total: self.total,
                });
            }
        }
    }
}

impl<S: Store + ?Sized> Iterator for PatientScan<'_, S> {
    type Item = Result<PatientRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            self.scanned += 1;
            self.report();
            // Keys that share the prefix but carry no identifier are not patients
            let Some(id) = self.schema.patient_id_from_key(&key) else {
                trace!(key = %key, "skipping non-patient key");
                continue;
            };
            return Some(
                self.store
                    .get_hash(&key)
                    .map(|raw| PatientRecord::from_fields(id, &raw)),
            );
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}
