//! Keyword/BM25 search via Tantivy, implementing `ragq_core::SparseIndex`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use ragq_core::{DocumentChunk, Result, SparseIndex, SparseSearchHit};
use tantivy::{
    Index, IndexReader, IndexWriter, TantivyDocument,
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, STORED, STRING, Schema, TextFieldIndexing, TextOptions},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
};

use crate::RetrievalError;

#[derive(Debug, Clone)]
pub struct SparseConfig {
    pub index_path: Option<String>,
    pub top_k: usize,
    pub stemming: bool,
    pub language: String,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            top_k: 100,
            stemming: true,
            language: "en".to_string(),
        }
    }
}

pub struct TantivySparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    text_field: Field,
    title_field: Field,
    config: SparseConfig,
}

impl TantivySparseIndex {
    pub fn new(config: SparseConfig) -> std::result::Result<Self, RetrievalError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("default")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options.clone());
        let title_field = schema_builder.add_text_field("title", text_options);

        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema.clone())
                .map_err(|e| RetrievalError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema.clone())
        };

        let tokenizer = Self::build_tokenizer(&config);
        index.tokenizers().register("default", tokenizer);

        let reader = index
            .reader()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            text_field,
            title_field,
            config,
        })
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming && config.language == "en" {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    pub fn index_documents(
        &self,
        chunks: &[DocumentChunk],
    ) -> std::result::Result<(), RetrievalError> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RetrievalError::Index("writer not available".to_string()))?;

        for chunk in chunks {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &chunk.id);
            doc.add_text(self.text_field, &chunk.text);
            if let Some(ref title) = chunk.title {
                doc.add_text(self.title_field, title);
            }
            writer
                .add_document(doc)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn search_sync(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<SparseSearchHit>, RetrievalError> {
        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.title_field]);

        let parsed = query_parser
            .parse_query(query)
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k))
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RetrievalError::Search(e.to_string()))?;

            let id = field_str(&doc, self.id_field).unwrap_or_default();
            let text = field_str(&doc, self.text_field).unwrap_or_default();
            let title = field_str(&doc, self.title_field);

            let mut chunk = DocumentChunk::new(id, text);
            chunk.title = title;

            hits.push(SparseSearchHit { chunk, score });
        }

        Ok(hits)
    }
}

fn field_str(doc: &TantivyDocument, field: Field) -> Option<String> {
    match doc.get_first(field) {
        Some(OwnedValue::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl SparseIndex for TantivySparseIndex {
    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SparseSearchHit>> {
        let top_k = if top_k == 0 { self.config.top_k } else { top_k };
        Ok(self.search_sync(query_text, top_k)?)
    }
}
