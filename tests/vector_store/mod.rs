use knowbase::kv::KvStore;
use knowbase::model::{Chunk, ChunkMetadata, ChunkType, ContentType, Product};
use knowbase::vector_store::{ProductSearchFilter, VectorStore};

fn chunk(id: &str, content: &str) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        document_id: "doc1".to_string(),
        kb_id: "kb1".to_string(),
        chunk_index: 0,
        content: content.to_string(),
        chunk_type: ChunkType::Text,
        content_type: ContentType::General,
        metadata: ChunkMetadata::default(),
    }
}

fn product(id: &str, vendor: &str, price: f64, inventory: i64) -> Product {
    Product {
        product_id: id.to_string(),
        kb_id: "kb1".to_string(),
        shopify_product_id: None,
        title: format!("Product {id}"),
        description: "a thing for sale".to_string(),
        price,
        inventory,
        variants: vec![],
        handle: id.to_string(),
        shop_domain: "shop.example.com".to_string(),
        vendor: Some(vendor.to_string()),
        product_type: Some("widgets".to_string()),
    }
}

#[test]
fn search_chunks_ranks_by_cosine_and_respects_limit() {
    let store = VectorStore::new(KvStore::new());
    store.store_chunk_vector("kb1", &chunk("near", "x"), vec![1.0, 0.0]);
    store.store_chunk_vector("kb1", &chunk("mid", "x"), vec![0.7, 0.7]);
    store.store_chunk_vector("kb1", &chunk("far", "x"), vec![0.0, 1.0]);

    let results = store.search_chunks("kb1", &[1.0, 0.0], 2);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entity_id, "near");
    assert!(results[0].score >= results[1].score);
}

#[test]
fn vector_count_covers_chunks_products_and_images() {
    let store = VectorStore::new(KvStore::new());
    store.store_chunk_vector("kb1", &chunk("c1", "x"), vec![1.0, 0.0]);
    store.store_product_vector("kb1", &product("p1", "acme", 9.99, 3), vec![0.0, 1.0]);
    store.store_image_vector("kb1", "img1", "a red shirt", vec![0.5, 0.5]);
    assert_eq!(store.vector_count("kb1"), 3);
}

#[test]
fn search_products_applies_vendor_and_stock_filters() {
    let store = VectorStore::new(KvStore::new());
    let acme_in_stock = product("p1", "acme", 10.0, 5);
    let acme_out_of_stock = product("p2", "acme", 10.0, 0);
    let other_vendor = product("p3", "globex", 10.0, 5);
    store.store_product_vector("kb1", &acme_in_stock, vec![1.0, 0.0]);
    store.store_product_vector("kb1", &acme_out_of_stock, vec![1.0, 0.0]);
    store.store_product_vector("kb1", &other_vendor, vec![1.0, 0.0]);

    let products = [acme_in_stock.clone(), acme_out_of_stock.clone(), other_vendor.clone()];
    let lookup = |id: &str| products.iter().find(|p| p.product_id == id).cloned();

    let filter = ProductSearchFilter {
        vendor: Some("acme".to_string()),
        in_stock_only: true,
        ..Default::default()
    };
    let results = store.search_products("kb1", &[1.0, 0.0], 10, &filter, lookup);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.entity_id, "p1");
}

#[test]
fn delete_document_vectors_leaves_other_documents_untouched() {
    let store = VectorStore::new(KvStore::new());
    store.store_chunk_vector("kb1", &chunk("c1", "keep me"), vec![1.0, 0.0]);
    store.store_chunk_vector("kb1", &chunk("c2", "delete me"), vec![0.0, 1.0]);
    store.delete_document_vectors("kb1", &["c2".to_string()]);

    let results = store.search_chunks("kb1", &[0.5, 0.5], 10);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity_id, "c1");
}
