use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::error::AppError;

/// Everything a camera-trap marker needs on the published map. Frozen onto
/// the map record at creation; coordinates are already projected (EPSG:3857).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MapPointAttributes {
    pub x: f64,
    pub y: f64,
    pub title: String,
    pub image_url: String,
    pub description: String,
}

/// Render the web-map document: the base template (imagery basemap, stickpin
/// note layer) with one point feature per camera folder.
pub fn interpolate_map_document(
    points: impl IntoIterator<Item = MapPointAttributes>,
) -> Result<Value, AppError> {
    let features: Vec<Value> = points.into_iter().map(feature_for_point).collect();

    let mut document: Value = serde_json::from_str(MAP_TEMPLATE)
        .map_err(|e| AppError::configuration(format!("map template is not valid JSON: {e}")))?;

    let feature_slot = document
        .pointer_mut("/operationalLayers/0/featureCollection/layers/0/featureSet/features")
        .ok_or_else(|| {
            AppError::configuration("map template has no feature slot to fill".to_string())
        })?;
    *feature_slot = Value::Array(features);

    Ok(document)
}

fn feature_for_point(point: MapPointAttributes) -> Value {
    json!({
        "geometry": {
            "x": point.x,
            "y": point.y,
            "spatialReference": { "wkid": 102100, "latestWkid": 3857 }
        },
        "attributes": {
            "VISIBLE": 1,
            "TYPEID": 0,
            "TITLE": point.title,
            "IMAGE_URL": point.image_url,
            "DESCRIPTION": format!(
                "<span style='background-color: rgb(255, 255, 255);'>{}<br /></span>",
                point.description
            ),
        }
    })
}

// Base web-map document. One note layer holds all camera trap markers; the
// popup shows the first photo of the trap plus its description.
const MAP_TEMPLATE: &str = r#"
{
  "operationalLayers": [
    {
      "layerType": "ArcGISFeatureLayer",
      "featureCollectionType": "notes",
      "id": "cameraTrapNotes",
      "title": "Camera trap locations",
      "featureCollection": {
        "layers": [
          {
            "popupInfo": {
              "mediaInfos": [
                {
                  "type": "image",
                  "value": {
                    "sourceURL": "{IMAGE_URL}",
                    "linkURL": "{IMAGE_LINK_URL}"
                  }
                }
              ],
              "description": "{DESCRIPTION}",
              "title": "{TITLE}"
            },
            "layerDefinition": {
              "templates": [],
              "drawingInfo": {
                "renderer": {
                  "uniqueValueInfos": [
                    {
                      "symbol": {
                        "contentType": "image/png",
                        "url": "https://static.arcgis.com/images/Symbols/Basic/GreenStickpin.png",
                        "yoffset": 12,
                        "width": 24,
                        "height": 24,
                        "type": "esriPMS",
                        "xoffset": 0
                      },
                      "description": "",
                      "value": "0",
                      "label": "Stickpin"
                    }
                  ],
                  "field1": "TYPEID",
                  "type": "uniqueValue"
                }
              },
              "displayField": "TITLE",
              "name": "Points",
              "hasAttachments": false,
              "fields": [
                {
                  "editable": false,
                  "alias": "OBJECTID",
                  "type": "esriFieldTypeOID",
                  "name": "OBJECTID"
                },
                {
                  "editable": true,
                  "alias": "Title",
                  "length": 255,
                  "type": "esriFieldTypeString",
                  "name": "TITLE"
                },
                {
                  "editable": true,
                  "alias": "Visible",
                  "type": "esriFieldTypeInteger",
                  "name": "VISIBLE"
                },
                {
                  "editable": true,
                  "alias": "Description",
                  "length": 1073741822,
                  "type": "esriFieldTypeString",
                  "name": "DESCRIPTION"
                },
                {
                  "editable": true,
                  "alias": "Image URL",
                  "length": 255,
                  "type": "esriFieldTypeString",
                  "name": "IMAGE_URL"
                },
                {
                  "editable": true,
                  "alias": "Image Link URL",
                  "length": 255,
                  "type": "esriFieldTypeString",
                  "name": "IMAGE_LINK_URL"
                },
                {
                  "editable": true,
                  "alias": "Type ID",
                  "type": "esriFieldTypeInteger",
                  "name": "TYPEID"
                }
              ],
              "capabilities": "Query,Editing",
              "visibilityField": "VISIBLE",
              "geometryType": "esriGeometryPoint",
              "typeIdField": "TYPEID",
              "objectIdField": "OBJECTID",
              "type": "Feature Layer",
              "types": [
                {
                  "templates": [
                    {
                      "prototype": {
                        "attributes": {
                          "VISIBLE": 1,
                          "TYPEID": 0,
                          "TITLE": "Point"
                        }
                      },
                      "drawingTool": "esriFeatureEditToolPoint",
                      "description": "",
                      "name": "Stickpin"
                    }
                  ],
                  "domains": {},
                  "id": 0,
                  "name": "Stickpin"
                }
              ],
              "spatialReference": { "wkid": 102100, "latestWkid": 3857 }
            },
            "featureSet": {
              "geometryType": "esriGeometryPoint",
              "features": []
            }
          }
        ],
        "showLegend": false
      },
      "opacity": 1,
      "visibility": true
    }
  ],
  "baseMap": {
    "baseMapLayers": [
      {
        "id": "World_Imagery",
        "layerType": "ArcGISTiledMapServiceLayer",
        "url": "https://services.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer",
        "visibility": true,
        "opacity": 1,
        "title": "World Imagery"
      },
      {
        "id": "Hybrid_Reference",
        "type": "VectorTileLayer",
        "layerType": "VectorTileLayer",
        "title": "Hybrid Reference Layer",
        "styleUrl": "https://cdn.arcgis.com/sharing/rest/content/items/30d6b8271e1849cd9c3042060001f425/resources/styles/root.json",
        "isReference": true,
        "visibility": true,
        "opacity": 1
      }
    ],
    "title": "Imagery Hybrid"
  },
  "spatialReference": { "wkid": 102100, "latestWkid": 3857 },
  "authoringApp": "WebMapViewer",
  "authoringAppVersion": "10.2",
  "version": "2.25"
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn point(title: &str, x: f64, y: f64) -> MapPointAttributes {
        MapPointAttributes {
            x,
            y,
            title: title.to_string(),
            image_url: format!("https://example.org/media/{title}.jpg"),
            description: "zone 1".to_string(),
        }
    }

    #[test]
    fn one_feature_per_point_lands_in_the_note_layer() {
        let document = interpolate_map_document(vec![
            point("CAMERA1_20220801", 794_787.77, 6_567_800.24),
            point("CAMERA2_20220408", 100.0, 200.0),
        ])
        .unwrap();

        let features = document
            .pointer("/operationalLayers/0/featureCollection/layers/0/featureSet/features")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(features.len(), 2);

        let first = &features[0];
        assert_eq!(
            first.pointer("/attributes/TITLE").unwrap(),
            "CAMERA1_20220801"
        );
        assert_eq!(
            first.pointer("/geometry/x").and_then(Value::as_f64).unwrap(),
            794_787.77
        );
        assert_eq!(
            first
                .pointer("/geometry/spatialReference/latestWkid")
                .and_then(Value::as_i64)
                .unwrap(),
            3857
        );
    }

    #[test]
    fn description_is_wrapped_for_the_popup() {
        let document = interpolate_map_document(vec![point("CAMERA1_20220801", 0.0, 0.0)]).unwrap();
        let description = document
            .pointer(
                "/operationalLayers/0/featureCollection/layers/0/featureSet/features/0/attributes/DESCRIPTION",
            )
            .and_then(Value::as_str)
            .unwrap();
        assert!(description.contains("zone 1"));
        assert!(description.starts_with("<span"));
    }

    #[test]
    fn empty_point_list_still_renders_a_valid_document() {
        let document = interpolate_map_document(vec![]).unwrap();
        let features = document
            .pointer("/operationalLayers/0/featureCollection/layers/0/featureSet/features")
            .and_then(Value::as_array)
            .unwrap();
        assert!(features.is_empty());
        assert!(document.get("baseMap").is_some());
    }
}
