//! Canned metadata documents used across the test suite.

/// A single 3-D float array (SST monthly climatology).
pub const SST_DDS: &str = "Dataset {
    Float32 SST[TIME = 12][Y = 90][X = 180];
} example;
";

/// Attributes matching [`SST_DDS`].
pub const SST_DAS: &str = r#"Attributes {
    NC_GLOBAL {
        String title "Sea surface temperature climatology";
        String Conventions "COARDS";
    }
    SST {
        String units "degC";
        Float32 missing_value -9.99e33;
        Float32 valid_range -5.0, 40.0;
    }
}
"#;

/// A grid with two coordinate maps.
pub const GRID_DDS: &str = "Dataset {
    Grid {
      Array:
        Int16 sst[time = 2][lat = 3];
      Maps:
        Float64 time[time = 2];
        Float64 lat[lat = 3];
    } sst;
} coads;
";

/// A flat sequence with two columns.
pub const SEQUENCE_DDS: &str = "Dataset {
    Sequence {
        Int32 a;
        Int16 b;
    } casts;
} cruise;
";

/// An outer sequence with a nested profile sequence.
pub const NESTED_SEQUENCE_DDS: &str = "Dataset {
    Sequence {
        String station;
        Sequence {
            Float64 depth;
            Float32 temp;
        } profile;
    } locations;
} nested;
";

/// A variety of DAP2 constructs for parser coverage.
pub const MIXED_DDS: &str = "Dataset {
    Byte flags[row = 3];
    String label;
    Url link;
    Structure {
        Int32 id;
        Float64 lonlat[pair = 2];
    } station;
    Grid {
      Array:
        Float32 z[lat = 2][lon = 2];
      Maps:
        Float32 lat[lat = 2];
        Float32 lon[lon = 2];
    } elevation;
    Sequence {
        Int32 a;
        Int16 b;
    } casts;
} mixed;
";

/// Grouped DAP4 dataset with a shared dimension (ICESat-2 layout).
pub const ATL03_DMR: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" dapVersion="4.0" dmrVersion="1.0" name="ATL03_20181014.h5">
    <Attribute name="short_name" type="String">
        <Value>ATL03</Value>
    </Attribute>
    <Group name="gt1r">
        <Group name="heights">
            <Dimension name="delta_time" size="100"/>
            <Float64 name="delta_time">
                <Dim name="/gt1r/heights/delta_time"/>
                <Attribute name="units" type="String">
                    <Value>seconds since 2018-01-01</Value>
                </Attribute>
            </Float64>
            <Float32 name="h_ph">
                <Dim name="/gt1r/heights/delta_time"/>
                <Attribute name="_FillValue" type="Float32">
                    <Value>NaN</Value>
                </Attribute>
                <Map name="/gt1r/heights/delta_time"/>
            </Float32>
            <Float64 name="lat_ph">
                <Dim name="delta_time"/>
            </Float64>
        </Group>
    </Group>
</Dataset>
"#;

/// A DAP4 dataset exercising every element kind.
pub const FULL_DMR: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" dapVersion="4.0" dmrVersion="1.0" name="full">
    <Dimension name="x" size="3"/>
    <Enumeration name="quality" basetype="UInt8">
        <EnumConst name="good" value="0"/>
        <EnumConst name="bad" value="1"/>
    </Enumeration>
    <Int64 name="counts">
        <Dim name="/x"/>
    </Int64>
    <Enum name="flag" enum="/quality"/>
    <String name="title"/>
    <Structure name="point">
        <Float32 name="lon"/>
        <Float32 name="lat"/>
    </Structure>
    <Sequence name="obs">
        <Int32 name="id"/>
        <String name="tag"/>
    </Sequence>
    <Opaque name="blob"/>
    <Float64 name="anon">
        <Dim size="2"/>
    </Float64>
    <Attribute name="history" type="String">
        <Value>created</Value>
        <Value>modified</Value>
    </Attribute>
    <Attribute name="extra" type="Container">
        <Attribute name="precision" type="Float64">
            <Value>0.1234567890123456789</Value>
        </Attribute>
    </Attribute>
</Dataset>
"#;

/// A one-variable DMR that asks for per-variable CRC32 checksums.
pub const CHECKSUMMED_DMR: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" dapVersion="4.0" dmrVersion="1.0" name="checked">
    <Dimension name="n" size="4"/>
    <Int32 name="v">
        <Dim name="/n"/>
    </Int32>
    <Attribute name="_DAP4_Checksum_CRC32" type="String">
        <Value>true</Value>
    </Attribute>
</Dataset>
"#;

/// DMR of a single 1-D variable, as returned by a constrained request.
pub fn single_variable_dmr(name: &str, dtype: &str, size: usize) -> String {
    format!(
        r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<Dataset xmlns="http://xml.opendap.org/ns/DAP/4.0#" dapVersion="4.0" dmrVersion="1.0" name="subset">
    <Dimension name="n" size="{size}"/>
    <{dtype} name="{name}">
        <Dim name="/n"/>
    </{dtype}>
</Dataset>
"#
    )
}

/// DDS of one granule of a time-aggregated collection.
pub fn granule_dds(time_len: usize) -> String {
    format!(
        "Dataset {{\n    Float64 time[time = {t}];\n    Float32 sst[time = {t}][lat = 4];\n}} granule;\n",
        t = time_len
    )
}
