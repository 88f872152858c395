use ethers::prelude::*;

abigen!(
    Api3ServerV1,
    r#"[
        function dataFeeds(bytes32 dataFeedId) external view returns (int224 value, uint32 timestamp)
        function readDataFeedWithId(bytes32 dataFeedId) external view returns (int224 value, uint32 timestamp)
        function updateBeaconWithSignedData(address airnode, bytes32 templateId, uint256 timestamp, bytes data, bytes signature) external returns (bytes32 beaconId)
        function updateBeaconSetWithBeacons(bytes32[] beaconIds) external returns (bytes32 beaconSetId)
        function multicall(bytes[] data) external returns (bytes[] returndata)
        function tryMulticall(bytes[] data) external returns (bool[] successes, bytes[] returndata)
    ]"#
);
