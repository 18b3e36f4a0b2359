use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::AppError;

/// A parsed camera-folder identifier, the join key between survey
/// submissions and MediaValet folders.
///
/// The name combines a camera id and the deployment setup date, e.g.
/// `CAMERA2_20220408`. Camera ids never contain underscores; the date part
/// may (depending on CAMERA_SETUP_DATE_FORMAT), so parsing splits on the
/// first underscore only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFolder {
    pub name: String,
    pub camera_id: String,
    pub setup_date: NaiveDate,
}

impl CameraFolder {
    pub fn parse(name: &str, date_format: &str) -> Result<Self, AppError> {
        let (camera_id, date_str) = name.split_once('_').ok_or_else(|| {
            AppError::validation(format!(
                "camera folder '{name}' is not in CAMERAID_DATE format"
            ))
        })?;
        if camera_id.is_empty() {
            return Err(AppError::validation(format!(
                "camera folder '{name}' has an empty camera id"
            )));
        }
        let setup_date = NaiveDate::parse_from_str(date_str, date_format).map_err(|_| {
            AppError::validation(format!(
                "camera folder '{name}' has no date matching format '{date_format}'"
            ))
        })?;
        Ok(CameraFolder {
            name: name.to_string(),
            camera_id: camera_id.to_string(),
            setup_date,
        })
    }
}

/// Pick the submission matching a camera folder out of the full survey
/// export: exact camera id match, setup date equal at day granularity.
/// Several submissions can match (a form submitted twice); the newest by
/// creation timestamp wins. Zero matches is reported by returning `None`
/// so the caller can raise it as a validation failure.
pub fn latest_matching_submission(
    records: Vec<Map<String, Value>>,
    folder: &CameraFolder,
    setup_date_field: &str,
    creation_date_field: &str,
) -> Option<Map<String, Value>> {
    let mut matching: Vec<Map<String, Value>> = records
        .into_iter()
        .filter(|record| {
            record
                .get("camera_id")
                .and_then(Value::as_str)
                .is_some_and(|id| id == folder.camera_id)
        })
        .filter(|record| {
            record
                .get(setup_date_field)
                .and_then(parse_survey_timestamp)
                .is_some_and(|ts| ts.date() == folder.setup_date)
        })
        .collect();

    if matching.len() > 1 {
        tracing::debug!(
            camera_folder = %folder.name,
            count = matching.len(),
            "multiple submissions match, using newest by creation date"
        );
    }

    matching.sort_by_key(|record| {
        record
            .get(creation_date_field)
            .and_then(parse_survey_timestamp)
    });
    matching.pop()
}

/// Survey timestamps show up as epoch milliseconds (feature service REST)
/// or as ISO-8601 strings (exports, locally cached raw records).
pub fn parse_survey_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.naive_utc())
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(camera_id: &str, setup: Value, creation: Value) -> Map<String, Value> {
        json!({
            "camera_id": camera_id,
            "date_and_time_of_camera_setup_o": setup,
            "CreationDate": creation,
            "project_name": "zone 1",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn folder(name: &str) -> CameraFolder {
        CameraFolder::parse(name, "%Y%m%d").unwrap()
    }

    // 2022-04-08 12:00:00 UTC
    const SETUP_MILLIS: i64 = 1_649_419_200_000;

    #[test]
    fn parses_well_formed_folder_name() {
        let parsed = folder("CAMERA2_20220408");
        assert_eq!(parsed.camera_id, "CAMERA2");
        assert_eq!(
            parsed.setup_date,
            NaiveDate::from_ymd_opt(2022, 4, 8).unwrap()
        );
    }

    #[test]
    fn date_part_may_contain_underscores() {
        let parsed = CameraFolder::parse("CAMERA1_4_08_2022", "%d_%m_%Y").unwrap();
        assert_eq!(parsed.camera_id, "CAMERA1");
        assert_eq!(
            parsed.setup_date,
            NaiveDate::from_ymd_opt(2022, 8, 4).unwrap()
        );
    }

    #[test]
    fn malformed_folder_name_is_a_validation_error() {
        for bad in ["CAMERA2", "CAMERA2_notadate", "_20220408"] {
            let err = CameraFolder::parse(bad, "%Y%m%d").unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn matches_on_camera_id_and_setup_date_only() {
        let records = vec![
            record("CAMERA2", json!(SETUP_MILLIS), json!(1_650_000_000_000i64)),
            // wrong camera
            record("CAMERA1", json!(SETUP_MILLIS), json!(1_650_000_000_000i64)),
            // wrong day
            record(
                "CAMERA2",
                json!(SETUP_MILLIS + 86_400_000),
                json!(1_650_000_000_000i64),
            ),
        ];
        let matched =
            latest_matching_submission(records, &folder("CAMERA2_20220408"), "date_and_time_of_camera_setup_o", "CreationDate")
                .unwrap();
        assert_eq!(matched.get("camera_id").unwrap(), "CAMERA2");
    }

    #[test]
    fn setup_time_of_day_does_not_matter() {
        // setup at 23:59 on the folder date still matches
        let late = SETUP_MILLIS + 11 * 3_600_000 + 59 * 60_000;
        let records = vec![record("CAMERA2", json!(late), json!(1i64))];
        assert!(latest_matching_submission(
            records,
            &folder("CAMERA2_20220408"),
            "date_and_time_of_camera_setup_o",
            "CreationDate"
        )
        .is_some());
    }

    #[test]
    fn newest_creation_date_wins_among_duplicates() {
        let records = vec![
            {
                let mut r = record("CAMERA2", json!(SETUP_MILLIS), json!(1_650_000_000_000i64));
                r.insert("marker".into(), json!("older"));
                r
            },
            {
                let mut r = record("CAMERA2", json!(SETUP_MILLIS), json!(1_650_100_000_000i64));
                r.insert("marker".into(), json!("newer"));
                r
            },
        ];
        let matched = latest_matching_submission(
            records,
            &folder("CAMERA2_20220408"),
            "date_and_time_of_camera_setup_o",
            "CreationDate",
        )
        .unwrap();
        assert_eq!(matched.get("marker").unwrap(), "newer");
    }

    #[test]
    fn zero_matches_yields_none() {
        let records = vec![record("CAMERA1", json!(SETUP_MILLIS), json!(1i64))];
        assert!(latest_matching_submission(
            records,
            &folder("CAMERA2_20220408"),
            "date_and_time_of_camera_setup_o",
            "CreationDate"
        )
        .is_none());
    }

    #[test]
    fn timestamps_parse_from_millis_and_strings() {
        let from_millis = parse_survey_timestamp(&json!(SETUP_MILLIS)).unwrap();
        assert_eq!(from_millis.date(), NaiveDate::from_ymd_opt(2022, 4, 8).unwrap());

        let from_iso = parse_survey_timestamp(&json!("2022-04-08T12:00:00Z")).unwrap();
        assert_eq!(from_iso, from_millis);

        let from_plain = parse_survey_timestamp(&json!("2022-04-08 12:00:00")).unwrap();
        assert_eq!(from_plain, from_millis);

        assert!(parse_survey_timestamp(&json!(null)).is_none());
    }
}
