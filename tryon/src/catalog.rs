//! Read-only product catalog.
//!
//! The catalog is built once at startup from configuration and shared by reference with every
//! handler. It is never mutated afterwards, so lookups need no synchronisation.
//!
//! Product images are referenced by file name inside the static directory. When rendered for
//! clients, file names are percent-encoded as UTF-8 so that names such as `맨투맨1.jpg` produce
//! valid URLs.

use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// Garment category shown in the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Category {
    Top,
    Outer,
    Bottom,
    Dress,
    Accessory,
}

/// A product record. Prices are whole KRW (no minor units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: u64,
    pub category: Category,
    /// File name of the garment image inside the static directory
    pub file_name: String,
}

impl Product {
    fn new(id: &str, name: &str, price: u64, file_name: &str, category: Category) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            category,
            file_name: file_name.to_string(),
        }
    }
}

/// How product image references are rendered in the JSON API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageUrlMode {
    /// `BASE_URL/static/<percent-encoded file name>`
    #[default]
    Absolute,
    /// `static/<file name>`, left for the client to resolve
    Relative,
}

/// The storefront catalog, in display order.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
    base_url: Url,
    image_urls: ImageUrlMode,
}

impl Catalog {
    pub fn new(products: Vec<Product>, base_url: Url, image_urls: ImageUrlMode) -> Self {
        Self {
            products,
            base_url,
            image_urls,
        }
    }

    /// All products in display order.
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Look up a product by id.
    pub fn find(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Image reference for API consumers, rendered according to the configured mode.
    pub fn image_ref(&self, product: &Product) -> String {
        match self.image_urls {
            ImageUrlMode::Absolute => public_url(&self.base_url, &["static", &product.file_name]).to_string(),
            ImageUrlMode::Relative => format!("static/{}", product.file_name),
        }
    }

    /// Server-relative image path (`/static/<encoded>`) for the bundled HTML pages.
    pub fn image_path(&self, product: &Product) -> String {
        self.local_path(&["static", &product.file_name])
    }

    /// Server-relative path built from percent-encoded segments, e.g. `/products/<id>`.
    pub fn local_path(&self, segments: &[&str]) -> String {
        public_url(&origin_of(&self.base_url), segments).path().to_string()
    }
}

/// Append path segments to a base URL, percent-encoding each segment.
///
/// A trailing slash on the base is dropped first, so `http://host/` and `http://host` both
/// produce `http://host/<segments>`. Bases that cannot carry a path (e.g. `mailto:`) are
/// rejected during config validation.
pub fn public_url(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn origin_of(base: &Url) -> Url {
    let mut url = base.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Format a KRW price with thousands separators, e.g. `189000` -> `189,000`.
pub fn format_price(price: u64) -> String {
    let digits = price.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// The catalog shipped with the demo storefront. Used when the config file lists no products.
pub fn default_products() -> Vec<Product> {
    use Category::*;
    vec![
        Product::new("hoodie_basic", "베이직 오버핏 후드 (그레이)", 89000, "hoodie.png", Top),
        Product::new("jacket_minimal", "미니멀 울 자켓 (블랙)", 189000, "jacket.png", Outer),
        Product::new("shirt_check", "클래식 체크 셔츠 (블루)", 65000, "shirt.png", Top),
        Product::new("mtm_navy", "데일리 시그니처 맨투맨 (네이비)", 59000, "맨투맨1.jpg", Top),
        Product::new("mtm_graphic", "어반 그래픽 맨투맨", 62000, "맨투맨2.jpg", Top),
        Product::new("shirt_stripe", "오피스 스트라이프 셔츠", 49000, "셔츠1.jpg", Top),
        Product::new("shirt_denim", "빈티지 워싱 데님 셔츠", 72000, "셔츠2.jpg", Top),
        Product::new("shirt_oxford", "프리미엄 옥스포드 셔츠", 55000, "셔츠3.jpg", Top),
        Product::new("sweater_knit", "케이블 니트 스웨터 (아이보리)", 85000, "스웨터1.jpg", Top),
        Product::new("jacket_daily", "모던 데일리 블레이저", 159000, "자켓1.jpg", Outer),
        Product::new("puffer_warm", "윈터 헤비 숏패딩", 239000, "패딩1.jpg", Outer),
    ]
}
