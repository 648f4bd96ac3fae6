//! Shared chain constants: event signatures, call selectors, curated tokens.

/// Event signature topics (topic0) for the transfer standards we decode.
pub mod topics {
    /// keccak256("Transfer(address,address,uint256)")
    ///
    /// Shared by ERC-20 and ERC-721; disambiguated by indexed-topic count
    /// (ERC-20 carries the amount in data, ERC-721 indexes the token id).
    pub const TRANSFER: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    /// keccak256("TransferSingle(address,address,address,uint256,uint256)")
    pub const TRANSFER_SINGLE: &str =
        "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";
    /// keccak256("TransferBatch(address,address,address,uint256[],uint256[])")
    pub const TRANSFER_BATCH: &str =
        "0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb";
}

/// 4-byte call selectors for the ERC-20 read interface.
pub mod selectors {
    /// balanceOf(address)
    pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
    /// symbol()
    pub const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
    /// decimals()
    pub const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
}

/// A curated fungible-token contract the aggregator probes by default.
#[derive(Debug, Clone, Copy)]
pub struct CuratedToken {
    pub contract: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// Well-known mainnet tokens probed when no enhanced discovery is available.
///
/// Order is probe order only; display order is by priced value.
pub const CURATED_TOKENS: &[CuratedToken] = &[
    // Stablecoins
    CuratedToken { contract: "0xdAC17F958D2ee523a2206206994597C13D831ec7", symbol: "USDT", decimals: 6 },
    CuratedToken { contract: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", symbol: "USDC", decimals: 6 },
    CuratedToken { contract: "0x6B175474E89094C44Da98b954EedeAC495271d0F", symbol: "DAI", decimals: 18 },
    CuratedToken { contract: "0x853d955aCEf822Db058eb8505911ED77F175b99e", symbol: "FRAX", decimals: 18 },
    CuratedToken { contract: "0x8E870D67F660D95d5be530380D0eC0bd388289E1", symbol: "USDP", decimals: 18 },
    // Majors
    CuratedToken { contract: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", symbol: "WETH", decimals: 18 },
    CuratedToken { contract: "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", symbol: "WBTC", decimals: 8 },
    // DeFi
    CuratedToken { contract: "0x514910771AF9Ca656af840dff83E8264EcF986CA", symbol: "LINK", decimals: 18 },
    CuratedToken { contract: "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", symbol: "UNI", decimals: 18 },
    CuratedToken { contract: "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9", symbol: "AAVE", decimals: 18 },
    CuratedToken { contract: "0x9f8F72aA9304c8B593d555F12eF6589cC3A579A2", symbol: "MKR", decimals: 18 },
    CuratedToken { contract: "0xD533a949740bb3306d119CC777fa900bA034cd52", symbol: "CRV", decimals: 18 },
    CuratedToken { contract: "0x6B3595068778DD592e39A122f4f5a5cF09C90fE2", symbol: "SUSHI", decimals: 18 },
    CuratedToken { contract: "0xc944E90C64B2c07662A292be6244BDf05Cda44a7", symbol: "GRT", decimals: 18 },
    // Community
    CuratedToken { contract: "0x95aD61b0a150d79219dCF64E1E6Cc01f0B64C4cE", symbol: "SHIB", decimals: 18 },
    CuratedToken { contract: "0x4d224452801ACEd8B2F0aebE155379bb5D594381", symbol: "APE", decimals: 18 },
    CuratedToken { contract: "0x0F5D2fB29fb7d3CFeE444a200298f468908cC942", symbol: "MANA", decimals: 18 },
    CuratedToken { contract: "0x3845badAde8e6dFF049820680d1F14bD3903a5d0", symbol: "SAND", decimals: 18 },
];

/// Wrapped ether; priced 1:1 against the native unit.
pub const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

/// CoinGecko asset ids for curated contracts (lowercase contract -> id).
pub const COINGECKO_IDS: &[(&str, &str)] = &[
    ("0xdac17f958d2ee523a2206206994597c13d831ec7", "tether"),
    ("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "usd-coin"),
    ("0x6b175474e89094c44da98b954eedeac495271d0f", "dai"),
    ("0x853d955acef822db058eb8505911ed77f175b99e", "frax"),
    ("0x8e870d67f660d95d5be530380d0ec0bd388289e1", "paxos-standard"),
    ("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", "wrapped-bitcoin"),
    ("0x514910771af9ca656af840dff83e8264ecf986ca", "chainlink"),
    ("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "uniswap"),
    ("0x7fc66500c84a76ad7e9c93437bfc5ac33e2ddae9", "aave"),
    ("0x9f8f72aa9304c8b593d555f12ef6589cc3a579a2", "maker"),
    ("0xd533a949740bb3306d119cc777fa900ba034cd52", "curve-dao-token"),
    ("0x6b3595068778dd592e39a122f4f5a5cf09c90fe2", "sushi"),
    ("0xc944e90c64b2c07662a292be6244bdf05cda44a7", "the-graph"),
    ("0x95ad61b0a150d79219dcf64e1e6cc01f0b64c4ce", "shiba-inu"),
    ("0x4d224452801aced8b2f0aebe155379bb5d594381", "apecoin"),
    ("0x0f5d2fb29fb7d3cfee444a200298f468908cc942", "decentraland"),
    ("0x3845badade8e6dff049820680d1f14bd3903a5d0", "the-sandbox"),
];
