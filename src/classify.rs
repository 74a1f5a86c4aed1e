//! Sector classification by keyword priority
//!
//! Instrument names are matched against an ordered keyword table. The first
//! keyword found in the lower-cased name decides the category, so more
//! specific themes (e.g. 新能源) are listed before broader ones (能源).

use serde::{Deserialize, Serialize};

/// Sector bucket used for grouping ranked results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorCategory {
    Semiconductors,
    Healthcare,
    NewEnergy,
    Consumer,
    Technology,
    Media,
    Financials,
    Defense,
    Cyclical,
    Infrastructure,
    Environmental,
    Tourism,
    Education,
    Sports,
    Other,
}

impl SectorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            SectorCategory::Semiconductors => "Semiconductors",
            SectorCategory::Healthcare => "Healthcare",
            SectorCategory::NewEnergy => "New Energy",
            SectorCategory::Consumer => "Consumer",
            SectorCategory::Technology => "Technology",
            SectorCategory::Media => "Media & Entertainment",
            SectorCategory::Financials => "Financials",
            SectorCategory::Defense => "Defense",
            SectorCategory::Cyclical => "Materials & Cyclicals",
            SectorCategory::Infrastructure => "Infrastructure & Real Estate",
            SectorCategory::Environmental => "Environmental",
            SectorCategory::Tourism => "Tourism",
            SectorCategory::Education => "Education",
            SectorCategory::Sports => "Sports",
            SectorCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for SectorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Keyword table in priority order. Keywords are lower-case.
static SECTOR_KEYWORDS: &[(&str, SectorCategory)] = &[
    // Semiconductors
    ("半导体", SectorCategory::Semiconductors),
    ("芯片", SectorCategory::Semiconductors),
    ("semiconductor", SectorCategory::Semiconductors),
    ("chip", SectorCategory::Semiconductors),
    // Healthcare
    ("医药", SectorCategory::Healthcare),
    ("医疗", SectorCategory::Healthcare),
    ("健康", SectorCategory::Healthcare),
    ("创新药", SectorCategory::Healthcare),
    ("生物", SectorCategory::Healthcare),
    ("器械", SectorCategory::Healthcare),
    ("health", SectorCategory::Healthcare),
    ("medical", SectorCategory::Healthcare),
    ("pharma", SectorCategory::Healthcare),
    ("biotech", SectorCategory::Healthcare),
    // New energy
    ("新能源", SectorCategory::NewEnergy),
    ("光伏", SectorCategory::NewEnergy),
    ("电池", SectorCategory::NewEnergy),
    ("碳中和", SectorCategory::NewEnergy),
    ("new energy", SectorCategory::NewEnergy),
    ("solar", SectorCategory::NewEnergy),
    ("battery", SectorCategory::NewEnergy),
    ("lithium", SectorCategory::NewEnergy),
    // Consumer
    ("消费", SectorCategory::Consumer),
    ("酒", SectorCategory::Consumer),
    ("食品", SectorCategory::Consumer),
    ("饮料", SectorCategory::Consumer),
    ("家电", SectorCategory::Consumer),
    ("consumer", SectorCategory::Consumer),
    ("liquor", SectorCategory::Consumer),
    ("food", SectorCategory::Consumer),
    ("beverage", SectorCategory::Consumer),
    // Technology
    ("科技", SectorCategory::Technology),
    ("信息", SectorCategory::Technology),
    ("5g", SectorCategory::Technology),
    ("通信", SectorCategory::Technology),
    ("电信", SectorCategory::Technology),
    ("人工智能", SectorCategory::Technology),
    ("tech", SectorCategory::Technology),
    ("information", SectorCategory::Technology),
    ("telecom", SectorCategory::Technology),
    ("artificial intelligence", SectorCategory::Technology),
    // Media & entertainment
    ("传媒", SectorCategory::Media),
    ("游戏", SectorCategory::Media),
    ("影视", SectorCategory::Media),
    ("娱乐", SectorCategory::Media),
    ("media", SectorCategory::Media),
    ("gaming", SectorCategory::Media),
    ("entertainment", SectorCategory::Media),
    // Financials
    ("金融", SectorCategory::Financials),
    ("证券", SectorCategory::Financials),
    ("券商", SectorCategory::Financials),
    ("银行", SectorCategory::Financials),
    ("保险", SectorCategory::Financials),
    ("financ", SectorCategory::Financials),
    ("securities", SectorCategory::Financials),
    ("broker", SectorCategory::Financials),
    ("bank", SectorCategory::Financials),
    ("insurance", SectorCategory::Financials),
    // Defense
    ("军工", SectorCategory::Defense),
    ("defense", SectorCategory::Defense),
    ("military", SectorCategory::Defense),
    // Materials & cyclicals
    ("有色", SectorCategory::Cyclical),
    ("煤炭", SectorCategory::Cyclical),
    ("钢铁", SectorCategory::Cyclical),
    ("资源", SectorCategory::Cyclical),
    ("稀土", SectorCategory::Cyclical),
    ("材料", SectorCategory::Cyclical),
    ("能源", SectorCategory::Cyclical),
    ("metal", SectorCategory::Cyclical),
    ("coal", SectorCategory::Cyclical),
    ("steel", SectorCategory::Cyclical),
    ("mining", SectorCategory::Cyclical),
    ("materials", SectorCategory::Cyclical),
    // Infrastructure & real estate
    ("地产", SectorCategory::Infrastructure),
    ("基建", SectorCategory::Infrastructure),
    ("建筑", SectorCategory::Infrastructure),
    ("建材", SectorCategory::Infrastructure),
    ("real estate", SectorCategory::Infrastructure),
    ("property", SectorCategory::Infrastructure),
    ("infrastructure", SectorCategory::Infrastructure),
    ("construction", SectorCategory::Infrastructure),
    // Environmental
    ("环保", SectorCategory::Environmental),
    ("environment", SectorCategory::Environmental),
    // Themes
    ("旅游", SectorCategory::Tourism),
    ("tourism", SectorCategory::Tourism),
    ("travel", SectorCategory::Tourism),
    ("教育", SectorCategory::Education),
    ("education", SectorCategory::Education),
    ("体育", SectorCategory::Sports),
    ("sport", SectorCategory::Sports),
];

/// Map an instrument display name to its sector category.
///
/// Never fails: names without a known keyword are [`SectorCategory::Other`].
pub fn classify(name: &str) -> SectorCategory {
    let lowered = name.to_lowercase();
    SECTOR_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, category)| *category)
        .unwrap_or(SectorCategory::Other)
}
