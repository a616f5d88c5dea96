mod common;

use cct_sheets::{CheckinLog, CheckinType, ConnectionError, GoogleSheetsOAuthClient, NewEntry, SheetsError, MAX_ROWS};
use chrono::Local;
use common::MockSheets;

async fn setup() -> (MockSheets, String) {
    let mock = MockSheets::new("good-token");
    mock.add_sheet(
        "cat-log",
        vec![
            vec!["01/14/2024 08:00:00", "01/14/2024 08:00", "Food, Insulin", "", ""],
            vec!["01/15/2024 07:30:00", "01/15/2024 07:30", "Food", "", ""],
            vec!["01/15/2024 09:00:00", "01/15/2024 09:00", "Water", "Full"],
            vec!["01/15/2024 12:00:00", "01/15/2024 12:00", "Blood Glucose Measurement", "", "210"],
        ],
    );
    mock.add_sheet("empty", vec![]);
    mock.0.lock().unwrap().spreadsheets.insert("blank".into(), vec![]);
    mock.0.lock().unwrap().private.insert("secret".into());
    mock.0.lock().unwrap().broken.insert("flaky".into());
    mock.add_sheet("secret", vec![]);
    mock.add_sheet("flaky", vec![]);
    let base = common::spawn(mock.clone()).await;
    (mock, base)
}

fn client(base: &str, token: &str, id: &str) -> GoogleSheetsOAuthClient {
    GoogleSheetsOAuthClient::new(token, id, None).with_base_url(base)
}

#[tokio::test]
async fn test_fetch_entries_newest_first() {
    let (mock, base) = setup().await;
    let entries = client(&base, "good-token", "cat-log").fetch_entries(100).await.unwrap();

    assert_eq!(entries.len(), 4);
    assert!(entries[0].has_type(CheckinType::BloodGlucose));
    assert_eq!(entries[0].bg_level(), Some(210));
    assert_eq!(entries[1].water_refill(), Some("Full"));
    assert_eq!(mock.0.lock().unwrap().ranges, vec!["Sheet1!A:E"]);
}

#[tokio::test]
async fn test_blank_sheet_has_no_entries() {
    let (_mock, base) = setup().await;
    assert!(client(&base, "good-token", "blank").fetch_entries(100).await.unwrap().is_empty());
    assert!(client(&base, "good-token", "empty").fetch_entries(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_errors() {
    let (_mock, base) = setup().await;

    let err = client(&base, "good-token", "missing").fetch_entries(10).await.unwrap_err();
    assert!(matches!(err, SheetsError::Api { status: 404, .. }));

    let err = client(&base, "bad-token", "cat-log").fetch_entries(10).await.unwrap_err();
    assert!(matches!(err, SheetsError::Api { status: 401, .. }));

    // The lenient variant swallows the error
    assert!(client(&base, "bad-token", "cat-log").get_entries(10).await.is_empty());
}

#[tokio::test]
async fn test_scans_over_fetched_entries() {
    let (_mock, base) = setup().await;
    let client = client(&base, "good-token", "cat-log");

    let last_insulin = client.get_last_entry_by_type(CheckinType::Insulin).await.unwrap();
    assert_eq!(last_insulin.date(), "01/14/2024 08:00");

    let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    assert_eq!(client.get_entries_for_date(day).await.len(), 3);

    assert!(client.get_last_entry_by_type(CheckinType::Food).await.is_some());
    assert_eq!(client.get_entries(MAX_ROWS).await.len(), 4);
}

#[tokio::test]
async fn test_append_then_count_today() {
    let (mock, base) = setup().await;
    let client = client(&base, "good-token", "empty");

    assert!(client.append_entry(&NewEntry::new(vec![CheckinType::Food, CheckinType::Insulin])).await);
    assert!(
        client
            .append_entry(&NewEntry::new(vec![CheckinType::Water]).with_water_refill(Some("Half".into())))
            .await
    );

    let rows = mock.rows("empty");
    assert_eq!(rows.len(), 3);
    let today = Local::now().format("%m/%d/%Y").to_string();
    assert_eq!(rows[1][1], today);
    assert_eq!(rows[1][2], "Food, Insulin");
    assert_eq!(rows[2][3], "Half");

    {
        let state = mock.0.lock().unwrap();
        let query = &state.append_queries[0];
        assert_eq!(query["valueInputOption"], "USER_ENTERED");
        assert_eq!(query["insertDataOption"], "INSERT_ROWS");
        assert_eq!(state.ranges[0], "Sheet1!A:E");
    }

    let counts = client.get_today_counts().await;
    assert_eq!(counts[&CheckinType::Food], 1);
    assert_eq!(counts[&CheckinType::Insulin], 1);
    assert_eq!(counts[&CheckinType::Water], 1);
    assert_eq!(counts[&CheckinType::BloodGlucose], 0);
}

#[tokio::test]
async fn test_append_failure_returns_false() {
    let (mock, base) = setup().await;
    assert!(!client(&base, "bad-token", "empty").append_entry(&NewEntry::new(vec![CheckinType::Food])).await);
    assert_eq!(mock.rows("empty").len(), 1);
}

#[tokio::test]
async fn test_custom_sheet_name_in_range() {
    let (mock, base) = setup().await;
    let client = GoogleSheetsOAuthClient::new("good-token", "cat-log", Some("Cat Log".into())).with_base_url(&base);
    assert_eq!(client.sheet_name(), "Cat Log");

    client.fetch_entries(10).await.unwrap();
    assert_eq!(mock.0.lock().unwrap().ranges, vec!["Cat Log!A:E"]);
}

#[tokio::test]
async fn test_connection_status_mapping() {
    let (_mock, base) = setup().await;

    assert_eq!(client(&base, "good-token", "cat-log").test_connection().await, Ok(()));
    assert_eq!(
        client(&base, "good-token", "missing").test_connection().await,
        Err(ConnectionError::NotFound)
    );
    assert_eq!(
        client(&base, "good-token", "secret").test_connection().await,
        Err(ConnectionError::PermissionDenied)
    );
    assert_eq!(
        client(&base, "bad-token", "cat-log").test_connection().await,
        Err(ConnectionError::InvalidCredentials)
    );
    assert_eq!(
        client(&base, "good-token", "flaky").test_connection().await,
        Err(ConnectionError::CannotConnect)
    );

    // Nothing listening
    let offline = GoogleSheetsOAuthClient::new("t", "cat-log", None).with_base_url("http://127.0.0.1:9");
    assert_eq!(offline.test_connection().await, Err(ConnectionError::CannotConnect));
}
