//! Mock market data tools. Payloads are canned records; only the dispatch
//! surface matters to the reasoning loop.

use chrono::{Duration, Local};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Function-call schemas for every available tool.
pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_positions",
            description: "Get current trading positions",
            parameters: json!({
                "type": "object",
                "properties": {},
            }),
        },
        ToolSpec {
            name: "get_static_data",
            description: "Get static market data by item name. Supported items: \
                llm_report, llm_report_audio, earning_season, market_sectors, \
                ipo_calendar, global_events, insider_trading_rss, senate_trading_rss",
            parameters: item_name_schema("Name of the static data item to retrieve"),
        },
        ToolSpec {
            name: "get_dynamic_data",
            description: "Get dynamic market data by item name. Supported items: \
                watchlist_data, major_indices, market_movers, extreme_stocks, \
                technical_analysis, vix_history, macroeconomic_indicators, general_news",
            parameters: item_name_schema("Name of the dynamic data item to retrieve"),
        },
        ToolSpec {
            name: "get_ticker_data",
            description: "Get specific ticker data. Supported items: \
                sales_revenue_segments, stock_news, stock_fundamentals",
            parameters: json!({
                "type": "object",
                "properties": {
                    "ticker": {
                        "type": "string",
                        "description": "Stock ticker symbol",
                    },
                    "item_name": {
                        "type": "string",
                        "description": "Type of data to retrieve",
                    },
                },
                "required": ["ticker", "item_name"],
            }),
        },
    ]
}

/// Dispatches a tool invocation by name. Unknown item names are reported
/// inside the payload (the loop keeps running); unknown tool names are a
/// caller error.
pub fn invoke(name: &str, args: &Value) -> Result<Value, ToolError> {
    match name {
        "get_positions" => Ok(get_positions()),
        "get_static_data" => Ok(get_static_data(str_arg(args, "item_name"))),
        "get_dynamic_data" => Ok(get_dynamic_data(str_arg(args, "item_name"))),
        "get_ticker_data" => Ok(get_ticker_data(
            str_arg(args, "ticker"),
            str_arg(args, "item_name"),
        )),
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn item_name_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "item_name": {
                "type": "string",
                "description": description,
            },
        },
        "required": ["item_name"],
    })
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn get_positions() -> Value {
    json!({
        "positions": [
            {
                "symbol": "AAPL",
                "shares": 100,
                "avg_cost": 150.00,
                "current_price": 155.50,
                "pnl": 550.00,
                "pnl_percent": 3.67
            },
            {
                "symbol": "GOOGL",
                "shares": 50,
                "avg_cost": 2800.00,
                "current_price": 2850.00,
                "pnl": 2500.00,
                "pnl_percent": 1.79
            }
        ],
        "total_value": 158050.00,
        "total_pnl": 3050.00,
        "total_pnl_percent": 1.97
    })
}

fn get_static_data(item_name: &str) -> Value {
    match item_name {
        "llm_report" => json!({
            "date": today(),
            "title": "Daily Market Analysis",
            "summary": "Markets showed mixed signals today with tech stocks leading gains...",
            "key_points": [
                "Tech sector up 2.5%",
                "Energy sector down 1.2%",
                "Fed comments boosted sentiment"
            ]
        }),
        "llm_report_audio" => json!({
            "url": "https://example.com/audio/daily-report.mp3",
            "duration": "5:32",
            "created_at": Local::now().to_rfc3339()
        }),
        "earning_season" => json!({
            "current_quarter": "Q4 2023",
            "upcoming_earnings": [
                {"symbol": "MSFT", "date": "2024-01-24", "estimate": 2.65},
                {"symbol": "TSLA", "date": "2024-01-25", "estimate": 0.73}
            ]
        }),
        "market_sectors" => json!({
            "sectors": [
                {"name": "Technology", "change_percent": 2.5, "top_gainer": "NVDA"},
                {"name": "Healthcare", "change_percent": 0.8, "top_gainer": "UNH"},
                {"name": "Energy", "change_percent": -1.2, "top_loser": "XOM"}
            ]
        }),
        "ipo_calendar" => json!({
            "upcoming_ipos": [
                {"symbol": "XYZ", "date": "2024-02-01", "price_range": "18-22"},
                {"symbol": "ABC", "date": "2024-02-05", "price_range": "25-30"}
            ]
        }),
        "global_events" => json!({
            "events": [
                {"date": "2024-01-31", "event": "Fed Rate Decision", "impact": "High"},
                {"date": "2024-02-02", "event": "NFP Report", "impact": "High"}
            ]
        }),
        "insider_trading_rss" => json!({
            "trades": [
                {"insider": "John Doe", "company": "AAPL", "action": "Buy", "shares": 10000},
                {"insider": "Jane Smith", "company": "GOOGL", "action": "Sell", "shares": 5000}
            ]
        }),
        "senate_trading_rss" => json!({
            "trades": [
                {"senator": "Senator X", "ticker": "MSFT", "action": "Buy", "amount": "$50K-$100K"},
                {"senator": "Senator Y", "ticker": "AMZN", "action": "Sell", "amount": "$15K-$50K"}
            ]
        }),
        other => unknown_item(other),
    }
}

fn get_dynamic_data(item_name: &str) -> Value {
    match item_name {
        "watchlist_data" => json!({
            "watchlist": [
                {"symbol": "AAPL", "price": 155.50, "change": 2.3, "volume": 45000000},
                {"symbol": "GOOGL", "price": 2850.00, "change": 1.5, "volume": 25000000},
                {"symbol": "MSFT", "price": 380.25, "change": -0.5, "volume": 30000000}
            ]
        }),
        "major_indices" => json!({
            "indices": [
                {"name": "S&P 500", "value": 4800.50, "change": 0.8},
                {"name": "Nasdaq", "value": 15200.75, "change": 1.2},
                {"name": "Dow Jones", "value": 37500.25, "change": 0.5}
            ]
        }),
        "market_movers" => json!({
            "gainers": [
                {"symbol": "NVDA", "change_percent": 5.2},
                {"symbol": "AMD", "change_percent": 4.8}
            ],
            "losers": [
                {"symbol": "BA", "change_percent": -3.2},
                {"symbol": "DIS", "change_percent": -2.8}
            ]
        }),
        "extreme_stocks" => json!({
            "overbought": ["NVDA", "AMD", "TSLA"],
            "oversold": ["BA", "DIS", "NKE"]
        }),
        "technical_analysis" => json!({
            "signals": [
                {"symbol": "AAPL", "signal": "Buy", "indicator": "RSI oversold"},
                {"symbol": "GOOGL", "signal": "Hold", "indicator": "Moving average support"}
            ]
        }),
        "vix_history" => json!({
            "current": 15.2,
            "1d_ago": 14.8,
            "1w_ago": 16.5,
            "1m_ago": 18.2
        }),
        "macroeconomic_indicators" => json!({
            "gdp_growth": 2.1,
            "inflation": 3.2,
            "unemployment": 3.7,
            "interest_rate": 5.5
        }),
        "general_news" => json!({
            "headlines": [
                "Fed signals potential rate cuts in 2024",
                "Tech earnings beat expectations",
                "Oil prices rise on supply concerns"
            ]
        }),
        other => unknown_item(other),
    }
}

fn get_ticker_data(ticker: &str, item_name: &str) -> Value {
    match item_name {
        "sales_revenue_segments" => json!({
            "ticker": ticker,
            "segments": [
                {"name": "Product Sales", "revenue": 250000000, "percent": 60},
                {"name": "Services", "revenue": 150000000, "percent": 36},
                {"name": "Other", "revenue": 16666667, "percent": 4}
            ]
        }),
        "stock_news" => json!({
            "ticker": ticker,
            "news": [
                {
                    "title": format!("{ticker} announces new product launch"),
                    "date": today(),
                    "sentiment": "positive"
                },
                {
                    "title": format!("Analysts upgrade {ticker} price target"),
                    "date": (Local::now() - Duration::days(1)).format("%Y-%m-%d").to_string(),
                    "sentiment": "positive"
                }
            ]
        }),
        "stock_fundamentals" => json!({
            "ticker": ticker,
            "pe_ratio": 25.5,
            "market_cap": 2500000000000u64,
            "dividend_yield": 0.5,
            "eps": 6.12,
            "revenue_growth": 15.2,
            "profit_margin": 25.8
        }),
        other => unknown_item(other),
    }
}

fn unknown_item(item: &str) -> Value {
    json!({ "error": format!("Unknown item: {item}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_payload_has_expected_shape() {
        let value = invoke("get_positions", &json!({})).expect("invoke");
        let positions = value["positions"].as_array().expect("positions array");
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0]["symbol"], "AAPL");
        assert_eq!(value["total_pnl"], 3050.00);
    }

    #[test]
    fn static_data_dispatches_by_item_name() {
        let value = invoke("get_static_data", &json!({"item_name": "market_sectors"}))
            .expect("invoke");
        assert_eq!(value["sectors"][0]["name"], "Technology");
    }

    #[test]
    fn unknown_item_is_reported_in_payload() {
        let value = invoke("get_dynamic_data", &json!({"item_name": "nope"})).expect("invoke");
        assert_eq!(value["error"], "Unknown item: nope");
    }

    #[test]
    fn ticker_data_echoes_ticker() {
        let value = invoke(
            "get_ticker_data",
            &json!({"ticker": "TSLA", "item_name": "stock_fundamentals"}),
        )
        .expect("invoke");
        assert_eq!(value["ticker"], "TSLA");
        assert_eq!(value["pe_ratio"], 25.5);
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let result = invoke("get_weather", &json!({}));
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[test]
    fn every_spec_has_an_object_schema() {
        for spec in specs() {
            assert_eq!(spec.parameters["type"], "object", "{}", spec.name);
        }
    }
}
