//! Startup inventory of a channel's files

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::transactions::TransactionsAnalysis;

use super::channel_file::{ChannelFile, FileKind};
use super::provider::FileProvider;

/// What a channel finds on disk before recovery
#[derive(Debug)]
pub struct StorageInventory {
    channel: usize,
    data_files: BTreeMap<u64, Arc<ChannelFile>>,
    transactions_file: Arc<ChannelFile>,
    analysis: Option<TransactionsAnalysis>,
}

impl StorageInventory {
    /// Discover data files and replay the transactions log
    pub fn read(channel: usize, provider: &dyn FileProvider) -> Result<Self> {
        let transactions_file = Arc::new(ChannelFile::new(
            channel,
            FileKind::Transactions,
            provider.transactions_file(channel),
        ));
        let analysis = TransactionsAnalysis::read(transactions_file.path())?;

        let data_files: BTreeMap<u64, Arc<ChannelFile>> = provider
            .collect_data_files(channel)?
            .into_iter()
            .map(|(number, path)| {
                (
                    number,
                    Arc::new(ChannelFile::new(channel, FileKind::Data { number }, path)),
                )
            })
            .collect();

        debug!(
            channel,
            data_files = data_files.len(),
            logged = analysis.is_some(),
            "read storage inventory"
        );

        Ok(Self {
            channel,
            data_files,
            transactions_file,
            analysis,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn data_files(&self) -> &BTreeMap<u64, Arc<ChannelFile>> {
        &self.data_files
    }

    pub fn transactions_file(&self) -> &Arc<ChannelFile> {
        &self.transactions_file
    }

    pub fn analysis(&self) -> Option<&TransactionsAnalysis> {
        self.analysis.as_ref()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<u64, Arc<ChannelFile>>,
        Arc<ChannelFile>,
        Option<TransactionsAnalysis>,
    ) {
        (self.data_files, self.transactions_file, self.analysis)
    }
}
